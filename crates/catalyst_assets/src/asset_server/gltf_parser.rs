use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use catalyst_core::transform::Transform;
use glam::{Mat4, Quat, Vec3};
use gltf::{Gltf, material::AlphaMode, mesh::Mode, texture::MagFilter};
use rayon::prelude::*;

use super::image_source::{ImageSource, decode_data_uri};
use crate::{
    assets::{Bounds, GeoSurface, MeshAsset, Vertex},
    error::AssetError,
    material::{
        MaterialData, MaterialPass, MaterialSettings, SamplerKind, TextureBinding, TextureData,
        TextureFormat,
    },
    scene::{NodeTransform, SceneData, SceneNode},
};

pub fn parse_gltf(path: &Path) -> Result<SceneData, AssetError> {
    let base_path = path.parent().unwrap_or(Path::new("./"));

    // A. Load Document & Buffers
    let gltf = Gltf::open(path).map_err(|source| AssetError::Gltf {
        path: path.to_path_buf(),
        source,
    })?;
    let buffers = load_buffers(&gltf, base_path)?;

    // --- STEP 1: TEXTURES ---
    let mut textures = load_textures(&gltf, base_path, &buffers);

    // --- STEP 2: MATERIALS ---
    let mut materials = Vec::new();
    let mut srgb_images = HashSet::new();

    for mat in gltf.materials() {
        let pbr = mat.pbr_metallic_roughness();

        let base_color_texture = pbr.base_color_texture().map(|info| {
            srgb_images.insert(info.texture().source().index());
            texture_binding(&info.texture())
        });
        let metallic_roughness_texture = pbr
            .metallic_roughness_texture()
            .map(|info| texture_binding(&info.texture()));

        let pass = match mat.alpha_mode() {
            AlphaMode::Blend => MaterialPass::Transparent,
            AlphaMode::Opaque | AlphaMode::Mask => MaterialPass::Opaque,
        };

        let name = match mat.name() {
            Some(name) => name.to_string(),
            None => format!("material_{}", materials.len()),
        };

        materials.push(MaterialData {
            name,
            settings: MaterialSettings {
                base_color: pbr.base_color_factor(),
                roughness: pbr.roughness_factor(),
                metallic: pbr.metallic_factor(),
            },
            pass,
            base_color_texture,
            metallic_roughness_texture,
        });
    }

    // Primitives without a material fall back to index 0, so it must exist.
    if materials.is_empty() {
        materials.push(MaterialData {
            name: "default".to_string(),
            ..Default::default()
        });
    }

    for index in srgb_images {
        if let Some(texture) = textures.get_mut(index) {
            texture.format = TextureFormat::Rgba8UnormSrgb;
        }
    }

    // --- STEP 3: MESHES ---
    let mut vertices: Vec<Vertex> = Vec::new();
    let mut indices: Vec<u32> = Vec::new();
    let mut meshes = Vec::new();

    for mesh in gltf.meshes() {
        let name = mesh
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("mesh_{}", mesh.index()));
        let mut surfaces = Vec::new();

        for primitive in mesh.primitives() {
            if primitive.mode() != Mode::Triangles {
                log::warn!(
                    "Skipping primitive {} of {name}: mode {:?} is not a triangle list",
                    primitive.index(),
                    primitive.mode()
                );
                continue;
            }

            let reader =
                primitive.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));

            let Some(positions) = reader.read_positions() else {
                log::warn!(
                    "Skipping primitive {} of {name}: no positions",
                    primitive.index()
                );
                continue;
            };

            // Indices are stored relative to the surface's first vertex in
            // the file, rebase them onto the shared vertex array.
            let initial_vertex = vertices.len();
            let first_index = indices.len() as u32;

            vertices.extend(positions.map(|position| Vertex {
                position,
                ..Default::default()
            }));
            let surface_vertices = &mut vertices[initial_vertex..];

            if let Some(normals) = reader.read_normals() {
                for (vertex, normal) in surface_vertices.iter_mut().zip(normals) {
                    vertex.normal = normal;
                }
            }
            if let Some(uvs) = reader.read_tex_coords(0) {
                for (vertex, [u, v]) in surface_vertices.iter_mut().zip(uvs.into_f32()) {
                    vertex.uv_x = u;
                    vertex.uv_y = v;
                }
            }
            if let Some(colors) = reader.read_colors(0) {
                for (vertex, color) in surface_vertices.iter_mut().zip(colors.into_rgba_f32()) {
                    vertex.color = color;
                }
            }

            let base = initial_vertex as u32;
            match reader.read_indices() {
                Some(read) => indices.extend(read.into_u32().map(|index| index + base)),
                None => indices.extend(base..vertices.len() as u32),
            }

            let bounds = Bounds::from_points(
                vertices[initial_vertex..]
                    .iter()
                    .map(|v| Vec3::from_array(v.position)),
            );

            surfaces.push(GeoSurface {
                first_index,
                index_count: indices.len() as u32 - first_index,
                material: primitive.material().index().unwrap_or(0),
                bounds,
            });
        }

        meshes.push(MeshAsset { name, surfaces });
    }

    // --- STEP 4: NODES (The Hierarchy) ---
    let nodes = gltf
        .nodes()
        .map(|node| {
            let transform = match node.transform() {
                gltf::scene::Transform::Matrix { matrix } => {
                    NodeTransform::Matrix(Mat4::from_cols_array_2d(&matrix))
                }
                gltf::scene::Transform::Decomposed {
                    translation,
                    rotation,
                    scale,
                } => NodeTransform::Trs(Transform {
                    translation: translation.into(),
                    rotation: Quat::from_array(rotation),
                    scale: scale.into(),
                }),
            };

            SceneNode {
                name: node
                    .name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("node_{}", node.index())),
                transform,
                mesh_index: node.mesh().map(|m| m.index()),
                children: node.children().map(|c| c.index()).collect(),
            }
        })
        .collect();

    Ok(SceneData {
        vertices,
        indices,
        meshes,
        materials,
        textures,
        nodes,
    })
}

fn texture_binding(texture: &gltf::Texture<'_>) -> TextureBinding {
    let sampler = match texture.sampler().mag_filter() {
        Some(MagFilter::Nearest) => SamplerKind::Nearest,
        Some(MagFilter::Linear) | None => SamplerKind::Linear,
    };
    TextureBinding {
        texture: texture.source().index(),
        sampler,
    }
}

fn load_buffers(gltf: &Gltf, base_path: &Path) -> Result<Vec<Vec<u8>>, AssetError> {
    gltf.buffers()
        .map(|buffer| {
            let data = match buffer.source() {
                gltf::buffer::Source::Bin => {
                    gltf.blob.clone().ok_or_else(|| AssetError::Buffer {
                        index: buffer.index(),
                        reason: "binary chunk missing".to_string(),
                    })?
                }
                gltf::buffer::Source::Uri(uri) if uri.starts_with("data:") => {
                    decode_data_uri(uri)?
                }
                gltf::buffer::Source::Uri(uri) => {
                    let path: PathBuf = base_path.join(uri);
                    std::fs::read(&path).map_err(|source| AssetError::Io { path, source })?
                }
            };

            if data.len() < buffer.length() {
                return Err(AssetError::Buffer {
                    index: buffer.index(),
                    reason: format!("expected {} bytes, found {}", buffer.length(), data.len()),
                });
            }
            Ok(data)
        })
        .collect()
}

/// Decodes every image in parallel. Images that cannot be located or
/// decoded become the error checkerboard so texture indices stay stable.
fn load_textures(gltf: &Gltf, base_path: &Path, buffers: &[Vec<u8>]) -> Vec<TextureData> {
    let sources: Vec<(String, Option<ImageSource>)> = gltf
        .images()
        .map(|image| {
            let name = image
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("image_{}", image.index()));
            let source = match ImageSource::from_gltf(image.source(), base_path) {
                Ok(source) => Some(source),
                Err(e) => {
                    log::warn!("Image {name} has an unusable source: {e}");
                    None
                }
            };
            (name, source)
        })
        .collect();

    sources
        .into_par_iter()
        .map(|(name, source)| {
            let decoded = source.map(|source| source.decode(buffers));
            match decoded {
                Some(Ok(image)) => TextureData {
                    name,
                    width: image.width(),
                    height: image.height(),
                    pixels: image.into_raw(),
                    format: TextureFormat::Rgba8Unorm,
                },
                Some(Err(e)) => {
                    log::warn!("Failed to load image {name}: {e}");
                    TextureData {
                        name,
                        ..TextureData::error_checkerboard()
                    }
                }
                None => TextureData {
                    name,
                    ..TextureData::error_checkerboard()
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use serde_json::json;

    fn png_2x2() -> Vec<u8> {
        let image = image::RgbaImage::from_raw(2, 2, vec![255; 16]).unwrap();
        let mut bytes = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn write_test_gltf(dir: &Path) -> PathBuf {
        let b64 = base64::engine::general_purpose::STANDARD;
        let png = png_2x2();

        let mut buffer = Vec::new();
        for p in [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
            for c in p {
                buffer.extend_from_slice(&c.to_le_bytes());
            }
        }
        for i in [0u16, 1, 2] {
            buffer.extend_from_slice(&i.to_le_bytes());
        }
        buffer.resize(44, 0);
        buffer.extend_from_slice(&png);

        let document = json!({
            "asset": { "version": "2.0" },
            "buffers": [{
                "byteLength": buffer.len(),
                "uri": format!("data:application/octet-stream;base64,{}", b64.encode(&buffer)),
            }],
            "bufferViews": [
                { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
                { "buffer": 0, "byteOffset": 36, "byteLength": 6 },
                { "buffer": 0, "byteOffset": 44, "byteLength": png.len() }
            ],
            "accessors": [
                { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                  "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] },
                { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }
            ],
            "images": [
                { "bufferView": 2, "mimeType": "image/png" },
                { "uri": format!("data:image/png;base64,{}", b64.encode(&png)) },
                { "uri": "missing_texture.png" }
            ],
            "samplers": [{ "magFilter": 9728 }],
            "textures": [
                { "source": 0, "sampler": 0 },
                { "source": 1 },
                { "source": 2 }
            ],
            "materials": [
                { "name": "textured",
                  "pbrMetallicRoughness": { "baseColorTexture": { "index": 0 } } },
                { "name": "glass", "alphaMode": "BLEND" }
            ],
            "meshes": [{
                "name": "tri",
                "primitives": [
                    { "attributes": { "POSITION": 0 }, "indices": 1, "material": 1 },
                    { "attributes": { "POSITION": 0 }, "indices": 1 }
                ]
            }],
            "nodes": [
                { "name": "root", "children": [1], "translation": [1.0, 0.0, 0.0] },
                { "name": "child", "mesh": 0,
                  "matrix": [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0,
                             0.0, 0.0, 1.0, 0.0, 0.0, 2.0, 0.0, 1.0] }
            ]
        });

        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join("scene.gltf");
        std::fs::write(&path, serde_json::to_vec(&document).unwrap()).unwrap();
        path
    }

    fn parse_fixture(tag: &str) -> SceneData {
        let dir = std::env::temp_dir().join(format!("catalyst_gltf_{tag}_{}", std::process::id()));
        let path = write_test_gltf(&dir);
        let scene = parse_gltf(&path).unwrap();
        let _ = std::fs::remove_dir_all(&dir);
        scene
    }

    #[test]
    fn images_from_every_source_decode_or_fall_back() {
        let scene = parse_fixture("images");

        assert_eq!(scene.textures.len(), 3);
        assert_eq!((scene.textures[0].width, scene.textures[0].height), (2, 2));
        assert_eq!(scene.textures[0].format, TextureFormat::Rgba8UnormSrgb);
        assert_eq!((scene.textures[1].width, scene.textures[1].height), (2, 2));
        assert_eq!(scene.textures[1].format, TextureFormat::Rgba8Unorm);
        // unreadable file becomes the checkerboard
        assert_eq!((scene.textures[2].width, scene.textures[2].height), (16, 16));
    }

    #[test]
    fn materials_keep_sampler_and_pass() {
        let scene = parse_fixture("materials");

        assert_eq!(scene.materials.len(), 2);
        assert_eq!(
            scene.materials[0].base_color_texture,
            Some(TextureBinding {
                texture: 0,
                sampler: SamplerKind::Nearest,
            })
        );
        assert_eq!(scene.materials[0].pass, MaterialPass::Opaque);
        assert_eq!(scene.materials[1].pass, MaterialPass::Transparent);
        assert_eq!(scene.materials[1].base_color_texture, None);
    }

    #[test]
    fn primitives_share_buffers_with_rebased_indices() {
        let scene = parse_fixture("meshes");

        assert_eq!(scene.vertices.len(), 6);
        assert_eq!(scene.indices, vec![0, 1, 2, 3, 4, 5]);

        let surfaces = &scene.meshes[0].surfaces;
        assert_eq!(surfaces.len(), 2);
        assert_eq!((surfaces[0].first_index, surfaces[0].index_count), (0, 3));
        assert_eq!((surfaces[1].first_index, surfaces[1].index_count), (3, 3));
        assert_eq!(surfaces[0].material, 1);
        assert_eq!(surfaces[1].material, 0);
        assert!(surfaces[0].bounds.sphere_radius > 0.0);
    }

    #[test]
    fn nodes_keep_hierarchy_and_transforms() {
        let scene = parse_fixture("nodes");

        assert_eq!(scene.nodes.len(), 2);
        assert_eq!(scene.nodes[0].children, vec![1]);
        assert_eq!(scene.nodes[1].mesh_index, Some(0));
        assert!(matches!(scene.nodes[0].transform, NodeTransform::Trs(_)));
        assert_eq!(
            scene.nodes[1].transform.to_matrix().w_axis.truncate(),
            Vec3::new(0.0, 2.0, 0.0)
        );
    }

    #[test]
    fn missing_file_is_reported() {
        let err = parse_gltf(Path::new("/definitely/not/here.gltf")).unwrap_err();
        assert!(matches!(err, AssetError::Gltf { .. }));
    }
}
