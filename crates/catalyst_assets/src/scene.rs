use catalyst_core::transform::Transform;
use glam::Mat4;

use crate::{
    assets::{MeshAsset, Vertex},
    material::{MaterialData, TextureData},
};

/// Output of an import: flat arrays plus a node list whose links are
/// indices into those arrays.
#[derive(Clone, Debug, Default)]
pub struct SceneData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub meshes: Vec<MeshAsset>,
    pub materials: Vec<MaterialData>,
    pub textures: Vec<TextureData>,

    // The Nodes
    pub nodes: Vec<SceneNode>,
}

/// The two ways a node can spell its local transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NodeTransform {
    Matrix(Mat4),
    Trs(Transform),
}

impl Default for NodeTransform {
    fn default() -> Self {
        NodeTransform::Matrix(Mat4::IDENTITY)
    }
}

impl NodeTransform {
    pub fn to_matrix(&self) -> Mat4 {
        match self {
            NodeTransform::Matrix(matrix) => *matrix,
            NodeTransform::Trs(transform) => transform.compute_matrix(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SceneNode {
    pub name: String,
    pub transform: NodeTransform,
    pub mesh_index: Option<usize>, // Index into the meshes list above
    pub children: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    #[test]
    fn trs_applies_scale_then_rotation_then_translation() {
        let transform = NodeTransform::Trs(Transform {
            translation: Vec3::new(10.0, 0.0, 0.0),
            rotation: Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
            scale: Vec3::splat(2.0),
        });

        let p = transform.to_matrix().transform_point3(Vec3::X);
        assert!(p.abs_diff_eq(Vec3::new(10.0, 2.0, 0.0), 1e-5));
    }

    #[test]
    fn matrix_variant_is_passed_through() {
        let matrix = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(NodeTransform::Matrix(matrix).to_matrix(), matrix);
    }
}
