use catalyst_assets::{MaterialData, MaterialPass, MeshAsset, SceneData, TextureData, Vertex};
use glam::Mat4;
use thiserror::Error;

pub mod draw_context;

pub use draw_context::{
    DrawContext, DrawIndexedCommand, FrustumCollisionData, IndirectDrawData, RenderObject,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SceneError {
    #[error("node {node} lists child {child}, but the scene has {count} nodes")]
    ChildOutOfRange {
        node: usize,
        child: usize,
        count: usize,
    },
    #[error("node {node} references mesh {mesh}, but the scene has {count} meshes")]
    MeshOutOfRange {
        node: usize,
        mesh: usize,
        count: usize,
    },
    #[error("node {child} is claimed by both node {first} and node {second}")]
    MultipleParents {
        child: usize,
        first: usize,
        second: usize,
    },
    #[error("{unreachable} nodes are part of a cycle and unreachable from any root")]
    Cycle { unreachable: usize },
}

/// Index of a node inside its [`LoadedScene`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    pub local_transform: Mat4,
    pub world_transform: Mat4,
    pub mesh: Option<usize>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// A scene after import. Nodes, meshes and materials live in flat arrays
/// and refer to each other by index.
#[derive(Debug, Default)]
pub struct LoadedScene {
    pub nodes: Vec<Node>,
    pub roots: Vec<NodeId>,
    pub meshes: Vec<MeshAsset>,
    pub materials: Vec<MaterialData>,
    pub textures: Vec<TextureData>,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl LoadedScene {
    /// Links parents, validates the hierarchy and computes world transforms.
    pub fn from_scene_data(data: SceneData) -> Result<Self, SceneError> {
        let count = data.nodes.len();
        let mut parents: Vec<Option<usize>> = vec![None; count];

        for (index, node) in data.nodes.iter().enumerate() {
            if let Some(mesh) = node.mesh_index {
                if mesh >= data.meshes.len() {
                    return Err(SceneError::MeshOutOfRange {
                        node: index,
                        mesh,
                        count: data.meshes.len(),
                    });
                }
            }

            for &child in &node.children {
                if child >= count {
                    return Err(SceneError::ChildOutOfRange {
                        node: index,
                        child,
                        count,
                    });
                }
                if let Some(first) = parents[child] {
                    return Err(SceneError::MultipleParents {
                        child,
                        first,
                        second: index,
                    });
                }
                parents[child] = Some(index);
            }
        }

        let nodes: Vec<Node> = data
            .nodes
            .into_iter()
            .zip(&parents)
            .map(|(node, parent)| Node {
                name: node.name,
                local_transform: node.transform.to_matrix(),
                world_transform: Mat4::IDENTITY,
                mesh: node.mesh_index,
                parent: parent.map(|p| NodeId(p as u32)),
                children: node.children.iter().map(|&c| NodeId(c as u32)).collect(),
            })
            .collect();

        let roots: Vec<NodeId> = parents
            .iter()
            .enumerate()
            .filter(|(_, parent)| parent.is_none())
            .map(|(index, _)| NodeId(index as u32))
            .collect();

        let mut scene = Self {
            nodes,
            roots,
            meshes: data.meshes,
            materials: data.materials,
            textures: data.textures,
            vertices: data.vertices,
            indices: data.indices,
        };

        // With at most one parent per node, anything a root cannot reach
        // sits on a cycle.
        let reached = scene.update_transforms();
        if reached != count {
            return Err(SceneError::Cycle {
                unreachable: count - reached,
            });
        }

        Ok(scene)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Recomputes every world transform from the roots down. Returns the
    /// number of nodes visited.
    pub fn update_transforms(&mut self) -> usize {
        let roots = self.roots.clone();
        roots
            .into_iter()
            .map(|root| self.update_transform(root, Mat4::IDENTITY))
            .sum()
    }

    /// Pre-order walk: `world = parent_world * local`, then the children.
    pub fn update_transform(&mut self, id: NodeId, parent_world: Mat4) -> usize {
        let mut stack = vec![(id, parent_world)];
        let mut visited = 0;

        while let Some((id, parent_world)) = stack.pop() {
            let node = &mut self.nodes[id.index()];
            node.world_transform = parent_world * node.local_transform;
            visited += 1;

            let world = node.world_transform;
            stack.extend(node.children.iter().rev().map(|&child| (child, world)));
        }

        visited
    }

    /// Flattens every mesh-bearing node reachable from the roots into `ctx`.
    pub fn add_to_draw_context(&self, top_matrix: &Mat4, ctx: &mut DrawContext) {
        for &root in &self.roots {
            self.add_node_to_draw_context(root, top_matrix, ctx);
        }

        let transparent = ctx
            .surfaces
            .iter()
            .filter(|object| object.pass == MaterialPass::Transparent)
            .count();
        if transparent > 0 {
            log::debug!("{transparent} transparent surfaces are drawn with the opaque pass");
        }
    }

    fn add_node_to_draw_context(&self, id: NodeId, top_matrix: &Mat4, ctx: &mut DrawContext) {
        let node = self.node(id);

        if let Some(mesh) = node.mesh.and_then(|m| self.meshes.get(m)) {
            let final_matrix = *top_matrix * node.world_transform;
            for surface in &mesh.surfaces {
                let pass = self
                    .materials
                    .get(surface.material)
                    .map(|m| m.pass)
                    .unwrap_or_default();
                ctx.push_surface(surface, pass, final_matrix);
            }
        }

        // Children get the scene placement, not this node's final matrix.
        for &child in &node.children {
            self.add_node_to_draw_context(child, top_matrix, ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalyst_assets::{Bounds, GeoSurface, NodeTransform, SceneNode};
    use glam::Vec3;

    fn translated(name: &str, t: Vec3, children: Vec<usize>) -> SceneNode {
        SceneNode {
            name: name.to_string(),
            transform: NodeTransform::Matrix(Mat4::from_translation(t)),
            mesh_index: None,
            children,
        }
    }

    fn one_surface_mesh(first_index: u32) -> MeshAsset {
        MeshAsset {
            name: format!("mesh_{first_index}"),
            surfaces: vec![GeoSurface {
                first_index,
                index_count: 3,
                material: 0,
                bounds: Bounds::default(),
            }],
        }
    }

    #[test]
    fn three_level_chain_composes_translations() {
        let data = SceneData {
            nodes: vec![
                translated("a", Vec3::new(1.0, 0.0, 0.0), vec![1]),
                translated("b", Vec3::new(0.0, 2.0, 0.0), vec![2]),
                translated("c", Vec3::new(0.0, 0.0, 3.0), vec![]),
            ],
            ..Default::default()
        };

        let scene = LoadedScene::from_scene_data(data).unwrap();
        assert_eq!(scene.roots, vec![NodeId(0)]);
        assert_eq!(scene.node(NodeId(2)).parent, Some(NodeId(1)));
        assert_eq!(
            scene.node(NodeId(2)).world_transform.w_axis.truncate(),
            Vec3::new(1.0, 2.0, 3.0)
        );
    }

    #[test]
    fn update_transform_reseeds_a_subtree() {
        let data = SceneData {
            nodes: vec![
                translated("a", Vec3::X, vec![1]),
                translated("b", Vec3::Y, vec![]),
            ],
            ..Default::default()
        };
        let mut scene = LoadedScene::from_scene_data(data).unwrap();

        let visited = scene.update_transform(NodeId(0), Mat4::from_translation(Vec3::Z * 5.0));
        assert_eq!(visited, 2);
        assert_eq!(
            scene.node(NodeId(1)).world_transform.w_axis.truncate(),
            Vec3::new(1.0, 1.0, 5.0)
        );
    }

    #[test]
    fn flattening_visits_every_surface_once_in_order() {
        let mut meshes = vec![one_surface_mesh(0), one_surface_mesh(3)];
        meshes[1].surfaces.push(GeoSurface {
            first_index: 6,
            index_count: 6,
            material: 0,
            bounds: Bounds::default(),
        });

        let mut root = translated("root", Vec3::ZERO, vec![1, 2]);
        root.mesh_index = Some(0);
        let empty = translated("empty", Vec3::ZERO, vec![]);
        let mut leaf = translated("leaf", Vec3::ZERO, vec![]);
        leaf.mesh_index = Some(1);

        let scene = LoadedScene::from_scene_data(SceneData {
            nodes: vec![root, empty, leaf],
            meshes,
            ..Default::default()
        })
        .unwrap();

        let mut ctx = DrawContext::new(true);
        scene.add_to_draw_context(&Mat4::IDENTITY, &mut ctx);

        let firsts: Vec<u32> = ctx.surfaces.iter().map(|o| o.first_index).collect();
        assert_eq!(firsts, vec![0, 3, 6]);
        assert_eq!(ctx.indirect_draws.len(), 3);
        assert_eq!(ctx.collisions.len(), 3);
    }

    #[test]
    fn invalid_hierarchies_are_rejected() {
        let out_of_range = SceneData {
            nodes: vec![translated("a", Vec3::ZERO, vec![4])],
            ..Default::default()
        };
        assert!(matches!(
            LoadedScene::from_scene_data(out_of_range),
            Err(SceneError::ChildOutOfRange { child: 4, .. })
        ));

        let shared_child = SceneData {
            nodes: vec![
                translated("a", Vec3::ZERO, vec![2]),
                translated("b", Vec3::ZERO, vec![2]),
                translated("c", Vec3::ZERO, vec![]),
            ],
            ..Default::default()
        };
        assert!(matches!(
            LoadedScene::from_scene_data(shared_child),
            Err(SceneError::MultipleParents { child: 2, .. })
        ));

        let cycle = SceneData {
            nodes: vec![
                translated("root", Vec3::ZERO, vec![]),
                translated("a", Vec3::ZERO, vec![2]),
                translated("b", Vec3::ZERO, vec![1]),
            ],
            ..Default::default()
        };
        assert_eq!(
            LoadedScene::from_scene_data(cycle).unwrap_err(),
            SceneError::Cycle { unreachable: 2 }
        );

        let mut bad_mesh = translated("a", Vec3::ZERO, vec![]);
        bad_mesh.mesh_index = Some(0);
        assert!(matches!(
            LoadedScene::from_scene_data(SceneData {
                nodes: vec![bad_mesh],
                ..Default::default()
            }),
            Err(SceneError::MeshOutOfRange { .. })
        ));
    }
}
