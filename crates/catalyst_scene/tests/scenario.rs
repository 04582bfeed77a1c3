use catalyst_assets::{
    Bounds, GeoSurface, MaterialData, MeshAsset, NodeTransform, PlaceholderKind, ResolvedTexture,
    SamplerKind, SceneData, SceneNode, TextureBinding, TextureData,
};
use catalyst_scene::{DrawContext, LoadedScene};
use glam::{Mat4, Vec3};

fn mesh(name: &str, first_index: u32, material: usize) -> MeshAsset {
    MeshAsset {
        name: name.to_string(),
        surfaces: vec![GeoSurface {
            first_index,
            index_count: 3,
            material,
            bounds: Bounds::from_min_max(Vec3::splat(-0.5), Vec3::splat(0.5)),
        }],
    }
}

fn node(name: &str, translation: Vec3, mesh_index: usize, children: Vec<usize>) -> SceneNode {
    SceneNode {
        name: name.to_string(),
        transform: NodeTransform::Matrix(Mat4::from_translation(translation)),
        mesh_index: Some(mesh_index),
        children,
    }
}

fn two_material_scene() -> SceneData {
    SceneData {
        vertices: Vec::new(),
        indices: (0..9).collect(),
        meshes: vec![mesh("crate", 0, 0), mesh("lamp", 3, 1), mesh("shade", 6, 1)],
        materials: vec![
            MaterialData {
                name: "textured".to_string(),
                base_color_texture: Some(TextureBinding {
                    texture: 0,
                    sampler: SamplerKind::Nearest,
                }),
                ..Default::default()
            },
            MaterialData {
                name: "plain".to_string(),
                ..Default::default()
            },
        ],
        textures: vec![TextureData::solid("albedo", [200, 10, 10, 255])],
        nodes: vec![
            node("lonely", Vec3::new(0.0, 0.0, -3.0), 0, vec![]),
            node("parent", Vec3::new(2.0, 0.0, 0.0), 1, vec![2]),
            node("child", Vec3::new(0.0, 1.0, 0.0), 2, vec![]),
        ],
    }
}

#[test]
fn scene_root_placement_offsets_every_render_object() {
    let scene = LoadedScene::from_scene_data(two_material_scene()).unwrap();
    let top = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0));

    let mut ctx = DrawContext::new(true);
    scene.add_to_draw_context(&top, &mut ctx);

    assert_eq!(ctx.len(), 3);
    let translations: Vec<Vec3> = ctx
        .surfaces
        .iter()
        .map(|o| o.model_matrix.w_axis.truncate())
        .collect();
    assert_eq!(
        translations,
        vec![
            Vec3::new(10.0, 0.0, -3.0),
            Vec3::new(12.0, 0.0, 0.0),
            Vec3::new(12.0, 1.0, 0.0),
        ]
    );

    for (object, record) in ctx.surfaces.iter().zip(&ctx.indirect_draws) {
        assert_eq!(object.model_matrix, record.world_matrix);
        assert_eq!(object.material_index, record.material_index);
        assert!(object.visible);
    }
}

#[test]
fn untextured_material_uses_grey_placeholder() {
    let scene = LoadedScene::from_scene_data(two_material_scene()).unwrap();
    let texture_count = scene.textures.len();

    assert_eq!(
        scene.materials[0].resolved_base_color(texture_count),
        ResolvedTexture::Scene {
            texture: 0,
            sampler: SamplerKind::Nearest,
        }
    );
    assert_eq!(
        scene.materials[1].resolved_base_color(texture_count),
        ResolvedTexture::Placeholder {
            kind: PlaceholderKind::Grey,
            sampler: SamplerKind::Linear,
        }
    );
}
