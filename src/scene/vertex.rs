use std::hash::{Hash, Hasher};

use ash::vk;
use bytemuck::{Pod, Zeroable};

/// Vertex as the closest hit shader reads it. Missing normals and uvs are zero.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const FORMAT: vk::Format = vk::Format::R32G32B32_SFLOAT;

    pub fn new(pos: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self { pos, normal, uv }
    }

    fn bits(&self) -> [u32; 8] {
        bytemuck::cast(*self)
    }
}

// Bit exact so that deduplication never merges -0.0 with 0.0 and a NaN equals itself.
impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::mem::{offset_of, size_of};

    use super::*;

    #[test]
    fn layout_matches_shader() {
        assert_eq!(size_of::<Vertex>(), 32);
        assert_eq!(offset_of!(Vertex, pos), 0);
        assert_eq!(offset_of!(Vertex, normal), 12);
        assert_eq!(offset_of!(Vertex, uv), 24);
    }

    #[test]
    fn equality_is_bit_exact() {
        let a = Vertex::new([0.0, 1.0, 2.0], [0.0; 3], [0.0; 2]);
        let b = Vertex::new([-0.0, 1.0, 2.0], [0.0; 3], [0.0; 2]);
        assert_ne!(a, b);

        let nan = Vertex::new([f32::NAN, 0.0, 0.0], [0.0; 3], [0.0; 2]);
        assert_eq!(nan, nan);
    }

    #[test]
    fn equal_vertices_hash_once() {
        let a = Vertex::new([1.0, 2.0, 3.0], [0.0, 1.0, 0.0], [0.5, 0.5]);
        let set = [a, a, Vertex::default()].into_iter().collect::<HashSet<_>>();
        assert_eq!(set.len(), 2);
    }
}
