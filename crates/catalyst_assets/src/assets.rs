use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Vertex as the shaders read it through the vertex buffer address.
/// The UV is split around the vec3 fields so the struct packs into 48
/// bytes under std430 without padding.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv_x: f32,
    pub normal: [f32; 3],
    pub uv_y: f32,
    pub color: [f32; 4],
}

impl Default for Vertex {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            uv_x: 0.0,
            normal: [0.0, 1.0, 0.0],
            uv_y: 0.0,
            color: [1.0; 4],
        }
    }
}

/// Object-space bounding volume of one surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub origin: Vec3,
    pub extents: Vec3,
    pub sphere_center: Vec3,
    pub sphere_radius: f32,
}

impl Default for Bounds {
    fn default() -> Self {
        Self::from_min_max(Vec3::ZERO, Vec3::ZERO)
    }
}

impl Bounds {
    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        let origin = (max + min) * 0.5;
        let extents = (max - min) * 0.5;
        Self {
            origin,
            extents,
            sphere_center: origin,
            sphere_radius: extents.length(),
        }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut points = points.into_iter();
        let Some(first) = points.next() else {
            return Self::default();
        };
        let (min, max) = points.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Self::from_min_max(min, max)
    }
}

/// Index range inside the scene's shared index buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct GeoSurface {
    pub first_index: u32,
    pub index_count: u32,
    pub material: usize,
    pub bounds: Bounds,
}

#[derive(Clone, Debug, Default)]
pub struct MeshAsset {
    pub name: String,
    pub surfaces: Vec<GeoSurface>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_matches_shader_stride() {
        assert_eq!(std::mem::size_of::<Vertex>(), 48);
    }

    #[test]
    fn bounds_enclose_all_points() {
        let points = [
            Vec3::new(-1.0, 0.0, 2.0),
            Vec3::new(3.0, 4.0, -2.0),
            Vec3::new(0.0, 1.0, 0.0),
        ];
        let bounds = Bounds::from_points(points);

        assert_eq!(bounds.origin, Vec3::new(1.0, 2.0, 0.0));
        assert_eq!(bounds.extents, Vec3::new(2.0, 2.0, 2.0));
        for p in points {
            assert!(p.distance(bounds.sphere_center) <= bounds.sphere_radius + 1e-5);
        }
    }

    #[test]
    fn empty_point_set_has_zero_bounds() {
        let bounds = Bounds::from_points(std::iter::empty());
        assert_eq!(bounds.sphere_radius, 0.0);
    }
}
