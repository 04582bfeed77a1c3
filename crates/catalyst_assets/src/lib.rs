pub mod asset_server;
pub mod assets;
pub mod error;
pub mod material;
pub mod scene;

pub use asset_server::AssetServer;
pub use assets::{Bounds, GeoSurface, MeshAsset, Vertex};
pub use error::AssetError;
pub use material::{
    MaterialData, MaterialPass, MaterialSettings, PlaceholderKind, ResolvedTexture, SamplerKind,
    TextureBinding, TextureData, TextureFormat,
};
pub use scene::{NodeTransform, SceneData, SceneNode};
