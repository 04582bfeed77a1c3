use glam::{Mat4, Vec3, Vec4};

use catalyst_scene::{FrustumCollisionData, IndirectDrawData, RenderObject};

use crate::shader_data::CullingData;

/// Six inward-facing planes with unit normals, so `dot(plane, p)` is a
/// signed distance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    pub planes: [Vec4; 6],
}

impl Frustum {
    /// Side and near planes come from the rows of `proj * view`
    /// (`r3 ± r0`, `r3 ± r1`, `r3 - r2`). The far plane sits `far`
    /// units in front of the camera.
    pub fn new(view: &Mat4, proj: &Mat4, far: f32) -> Self {
        let clip = (*proj * *view).transpose();
        let (r0, r1, r2, r3) = (clip.x_axis, clip.y_axis, clip.z_axis, clip.w_axis);
        let view_z = view.transpose().z_axis;

        let planes = [
            r3 + r0,
            r3 - r0,
            r3 + r1,
            r3 - r1,
            r3 - r2,
            view_z + Vec4::new(0.0, 0.0, 0.0, far),
        ]
        .map(normalize_plane);

        Self { planes }
    }

    /// Visible unless the sphere is entirely behind one of the planes.
    pub fn sphere_visible(&self, center: Vec3, radius: f32) -> bool {
        let center = center.extend(1.0);
        self.planes.iter().all(|plane| plane.dot(center) > -radius)
    }

    pub fn to_gpu(&self, object_count: u32) -> CullingData {
        CullingData {
            planes: self.planes,
            object_count,
            _pad: [0; 3],
        }
    }
}

fn normalize_plane(plane: Vec4) -> Vec4 {
    let length = plane.truncate().length();
    if length > f32::EPSILON {
        plane / length
    } else {
        plane
    }
}

/// Writes `visible` on every object and returns how many passed. The
/// sphere center is rotated and scaled by `model_matrix`, then placed at
/// the object's `position`.
pub fn cull_render_objects(frustum: &Frustum, objects: &mut [RenderObject]) -> usize {
    let mut visible = 0;
    for object in objects.iter_mut() {
        let offset = object
            .model_matrix
            .transform_vector3(object.bounds.sphere_center);
        let center = object.position + offset;
        let radius = object.bounds.sphere_radius * object.scale;
        object.visible = frustum.sphere_visible(center, radius);
        visible += object.visible as usize;
    }
    visible
}

/// Host version of one `cull.comp` invocation: reads the planes from the
/// uniform block and writes `instanceCount` in place.
pub fn cull_indirect_record(
    culling: &CullingData,
    collision: &FrustumCollisionData,
    record: &mut IndirectDrawData,
) -> bool {
    let center = record.world_matrix * Vec3::from_array(collision.center).extend(1.0);
    let center = center.truncate().extend(1.0);

    let mut visible = true;
    for plane in &culling.planes {
        if plane.dot(center) <= -collision.radius {
            visible = false;
        }
    }

    record.command.instance_count = visible as u32;
    visible
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalyst_assets::{Bounds, GeoSurface, MaterialPass, MeshAsset, NodeTransform, SceneData, SceneNode};
    use catalyst_core::{Camera, Transform};
    use catalyst_scene::{DrawContext, LoadedScene};
    use glam::Quat;
    use std::mem::offset_of;

    fn camera_at(position: Vec3) -> (Mat4, Mat4) {
        let view = Mat4::look_to_rh(position, Vec3::NEG_Z, Vec3::Y);
        let camera = Camera {
            aspect_ratio: 16.0 / 9.0,
            ..Default::default()
        };
        (view, camera.compute_projection_matrix())
    }

    fn object_at(position: Vec3, radius: f32) -> RenderObject {
        RenderObject {
            first_index: 0,
            index_count: 3,
            material_index: 0,
            pass: MaterialPass::Opaque,
            model_matrix: Mat4::from_translation(position),
            bounds: Bounds {
                origin: Vec3::ZERO,
                extents: Vec3::splat(radius),
                sphere_center: Vec3::ZERO,
                sphere_radius: radius,
            },
            scale: 1.0,
            position,
            visible: false,
        }
    }

    #[test]
    fn sphere_on_the_camera_is_visible() {
        for position in [Vec3::ZERO, Vec3::new(0.0, 2.0, 8.0), Vec3::new(-40.0, 3.0, 7.0)] {
            let (view, proj) = camera_at(position);
            let frustum = Frustum::new(&view, &proj, 10_000.0);
            assert!(frustum.sphere_visible(position, 1.0));
        }
    }

    #[test]
    fn spheres_outside_a_single_plane_are_culled() {
        let (view, proj) = camera_at(Vec3::ZERO);
        let frustum = Frustum::new(&view, &proj, 10_000.0);

        // behind the camera
        assert!(!frustum.sphere_visible(Vec3::new(0.0, 0.0, 100.0), 1.0));
        // far off to the side
        assert!(!frustum.sphere_visible(Vec3::new(-100.0, 0.0, -1.0), 1.0));
        // past the far distance
        assert!(!frustum.sphere_visible(Vec3::new(0.0, 0.0, -10_050.0), 1.0));
        // straight ahead
        assert!(frustum.sphere_visible(Vec3::new(0.0, 0.0, -50.0), 1.0));
    }

    #[test]
    fn shrinking_a_sphere_never_makes_it_visible() {
        let (view, proj) = camera_at(Vec3::new(0.0, 2.0, 8.0));
        let frustum = Frustum::new(&view, &proj, 500.0);

        for x in (-60..=60).step_by(6) {
            for z in (-600..=60).step_by(30) {
                let center = Vec3::new(x as f32, 1.0, z as f32);
                let mut was_visible = true;
                for radius in [40.0, 20.0, 10.0, 5.0, 1.0, 0.1, 0.0] {
                    let visible = frustum.sphere_visible(center, radius);
                    assert!(
                        was_visible || !visible,
                        "{center} became visible when radius shrank to {radius}"
                    );
                    was_visible = visible;
                }
            }
        }
    }

    #[test]
    fn cpu_pass_flags_each_object() {
        let (view, proj) = camera_at(Vec3::ZERO);
        let frustum = Frustum::new(&view, &proj, 10_000.0);
        let mut objects = vec![
            object_at(Vec3::new(0.0, 0.0, -10.0), 1.0),
            object_at(Vec3::new(0.0, 0.0, 10.0), 1.0),
            object_at(Vec3::new(0.0, 0.0, 3.0), 5.0),
        ];

        let visible = cull_render_objects(&frustum, &mut objects);

        assert_eq!(visible, 2);
        assert!(objects[0].visible);
        assert!(!objects[1].visible);
        // large enough to reach back across the near plane
        assert!(objects[2].visible);
    }

    #[test]
    fn radius_is_scaled_by_the_object_scale() {
        let (view, proj) = camera_at(Vec3::ZERO);
        let frustum = Frustum::new(&view, &proj, 10_000.0);
        let mut object = object_at(Vec3::new(0.0, 0.0, 4.0), 1.0);

        cull_render_objects(&frustum, std::slice::from_mut(&mut object));
        assert!(!object.visible);

        object.scale = 10.0;
        cull_render_objects(&frustum, std::slice::from_mut(&mut object));
        assert!(object.visible);
    }

    #[test]
    fn sphere_is_placed_at_the_object_position() {
        let (view, proj) = camera_at(Vec3::ZERO);
        let frustum = Frustum::new(&view, &proj, 10_000.0);
        let mut object = object_at(Vec3::ZERO, 1.0);
        object.model_matrix = Mat4::from_scale(Vec3::splat(2.0));
        object.bounds.sphere_center = Vec3::new(0.0, 0.0, -1.0);

        // offset (0, 0, -2) from a point well ahead of the camera
        object.position = Vec3::new(0.0, 0.0, -20.0);
        cull_render_objects(&frustum, std::slice::from_mut(&mut object));
        assert!(object.visible);

        object.position = Vec3::new(0.0, 0.0, 20.0);
        cull_render_objects(&frustum, std::slice::from_mut(&mut object));
        assert!(!object.visible);
    }

    fn scattered_scene() -> LoadedScene {
        let mesh = MeshAsset {
            name: "cube".to_string(),
            surfaces: vec![GeoSurface {
                first_index: 0,
                index_count: 3,
                material: 0,
                bounds: Bounds::from_min_max(Vec3::ZERO, Vec3::ONE),
            }],
        };

        let mut nodes = Vec::new();
        for (i, x) in (-40..=40).step_by(5).enumerate() {
            for (j, z) in (-90..=30).step_by(10).enumerate() {
                let scale = if (i + j) % 3 == 0 { 2.5 } else { 1.0 };
                nodes.push(SceneNode {
                    name: format!("cube_{x}_{z}"),
                    transform: NodeTransform::Trs(Transform {
                        translation: Vec3::new(x as f32 + 0.37, 0.13, z as f32 + 0.21),
                        rotation: Quat::from_rotation_y(0.3 * i as f32),
                        scale: Vec3::splat(scale),
                    }),
                    mesh_index: Some(0),
                    children: Vec::new(),
                });
            }
        }

        LoadedScene::from_scene_data(SceneData {
            indices: vec![0, 1, 2],
            meshes: vec![mesh],
            nodes,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn compute_pass_agrees_with_the_cpu_pass() {
        let scene = scattered_scene();
        let mut ctx = DrawContext::new(true);
        scene.add_to_draw_context(&Mat4::IDENTITY, &mut ctx);

        let (view, proj) = camera_at(Vec3::new(0.0, 2.0, 8.0));
        let frustum = Frustum::new(&view, &proj, 60.0);
        let culling = frustum.to_gpu(ctx.len() as u32);

        let cpu_visible = cull_render_objects(&frustum, &mut ctx.surfaces);
        let mut gpu_visible = 0;
        for (record, collision) in ctx.indirect_draws.iter_mut().zip(&ctx.collisions) {
            gpu_visible += cull_indirect_record(&culling, collision, record) as usize;
        }

        assert!(cpu_visible > 0 && cpu_visible < ctx.len());
        assert_eq!(cpu_visible, gpu_visible);
        for (object, record) in ctx.surfaces.iter().zip(&ctx.indirect_draws) {
            assert_eq!(object.visible as u32, record.command.instance_count);
        }
    }

    #[test]
    fn hidden_records_come_back_when_the_camera_turns() {
        let scene = scattered_scene();
        let mut ctx = DrawContext::new(true);
        scene.add_to_draw_context(&Mat4::IDENTITY, &mut ctx);
        let count = ctx.len() as u32;

        let ahead = {
            let (view, proj) = camera_at(Vec3::new(0.0, 2.0, 8.0));
            Frustum::new(&view, &proj, 10_000.0).to_gpu(count)
        };
        let behind = {
            let view = Mat4::look_to_rh(Vec3::new(0.0, 2.0, 8.0), Vec3::Z, Vec3::Y);
            let (_, proj) = camera_at(Vec3::ZERO);
            Frustum::new(&view, &proj, 10_000.0).to_gpu(count)
        };

        // the farthest cube sits straight ahead of the first camera
        let index = ctx
            .surfaces
            .iter()
            .position(|o| o.position.x.abs() < 1.0 && o.position.z < -80.0)
            .unwrap();
        let collision = ctx.collisions[index];
        let record = &mut ctx.indirect_draws[index];

        assert!(!cull_indirect_record(&behind, &collision, record));
        assert_eq!(record.command.instance_count, 0);
        assert!(cull_indirect_record(&ahead, &collision, record));
        assert_eq!(record.command.instance_count, 1);
    }

    #[test]
    fn culling_block_keeps_plane_order() {
        let (view, proj) = camera_at(Vec3::new(3.0, 1.0, -2.0));
        let frustum = Frustum::new(&view, &proj, 250.0);
        let culling = frustum.to_gpu(17);

        assert_eq!(culling.planes, frustum.planes);
        assert_eq!(culling.object_count, 17);
        // vec4 planes[6] then uint objectCount under std140
        assert_eq!(offset_of!(CullingData, planes), 0);
        assert_eq!(offset_of!(CullingData, object_count), 96);

        let bytes: &[u8] = bytemuck::bytes_of(&culling);
        let far: [f32; 4] = bytemuck::pod_read_unaligned(&bytes[80..96]);
        assert_eq!(Vec4::from_array(far), frustum.planes[5]);
    }
}
