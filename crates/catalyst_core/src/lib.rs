pub mod camera;
pub mod config;
pub mod time;
pub mod transform;

pub use camera::{Camera, FlyCamera};
pub use config::{ConfigError, EngineConfig};
pub use time::Time;
pub use transform::Transform;
