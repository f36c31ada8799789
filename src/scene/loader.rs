use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use anyhow::{ensure, Context as _, Result};
use log::{debug, warn};

use crate::scene::Vertex;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn triangle_count(&self) -> u32 {
        (self.indices.len() / 3) as u32
    }
}

fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        triangulate: true,
        single_index: false,
        ..Default::default()
    }
}

/// Loads every shape of an OBJ file into one mesh. Materials of the file are ignored.
pub fn load_obj<P: AsRef<Path>>(path: P) -> Result<MeshData> {
    let path = path.as_ref();
    debug!("Loading model {path:?}");

    let (models, _) = tobj::load_obj(path, &load_options())
        .with_context(|| format!("Failed to load model {path:?}"))?;

    merge_models(&models)
}

pub fn load_obj_from_reader<R: BufRead>(reader: &mut R) -> Result<MeshData> {
    let (models, _) = tobj::load_obj_buf(reader, &load_options(), |_| {
        Err(tobj::LoadError::OpenFileFailed)
    })?;

    merge_models(&models)
}

/// Builds one vertex per distinct (position, normal, uv) triple. Positions and
/// normals get their Y axis flipped, absent normals and uvs stay zero.
fn merge_models(models: &[tobj::Model]) -> Result<MeshData> {
    let mut data = MeshData::default();
    let mut unique_vertices = HashMap::<Vertex, u32>::new();

    for model in models {
        let mesh = &model.mesh;
        let has_normals = !mesh.normal_indices.is_empty();
        let has_uvs = !mesh.texcoord_indices.is_empty();

        if mesh.indices.is_empty() {
            warn!("Model {} has no faces", model.name);
        }

        for (i, &index) in mesh.indices.iter().enumerate() {
            let index = index as usize;
            let pos = mesh
                .positions
                .get(3 * index..3 * index + 3)
                .with_context(|| format!("Position index {index} out of range in {}", model.name))?;

            let mut vertex = Vertex::new([pos[0], -pos[1], pos[2]], [0.0; 3], [0.0; 2]);

            if has_normals {
                let index = mesh.normal_indices[i] as usize;
                let normal = mesh
                    .normals
                    .get(3 * index..3 * index + 3)
                    .with_context(|| format!("Normal index {index} out of range in {}", model.name))?;
                vertex.normal = [normal[0], -normal[1], normal[2]];
            }

            if has_uvs {
                let index = mesh.texcoord_indices[i] as usize;
                let uv = mesh
                    .texcoords
                    .get(2 * index..2 * index + 2)
                    .with_context(|| format!("Texcoord index {index} out of range in {}", model.name))?;
                vertex.uv = [uv[0], uv[1]];
            }

            let next_index = data.vertices.len() as u32;
            let index = *unique_vertices.entry(vertex).or_insert_with(|| {
                data.vertices.push(vertex);
                next_index
            });
            data.indices.push(index);
        }
    }

    ensure!(data.indices.len() % 3 == 0, "Model indices do not form triangles");

    Ok(data)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::io::Cursor;

    use super::*;

    const QUAD: &str = "
v -1.0 -1.0 0.0
v  1.0 -1.0 0.0
v  1.0  1.0 0.0
v -1.0  1.0 0.0
vn 0.0 1.0 0.0
vt 0.0 0.0
vt 1.0 0.0
vt 1.0 1.0
vt 0.0 1.0
f 1/1/1 2/2/1 3/3/1
f 1/1/1 3/3/1 4/4/1
";

    fn load(source: &str) -> MeshData {
        load_obj_from_reader(&mut Cursor::new(source)).unwrap()
    }

    #[test]
    fn quad_shares_vertices_between_triangles() {
        let mesh = load(QUAD);

        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn y_is_flipped_on_positions_and_normals() {
        let mesh = load(QUAD);

        assert_eq!(mesh.vertices[0].pos, [-1.0, 1.0, 0.0]);
        assert_eq!(mesh.vertices[2].pos, [1.0, -1.0, 0.0]);
        assert_eq!(mesh.vertices[0].normal, [0.0, -1.0, 0.0]);
        assert_eq!(mesh.vertices[2].uv, [1.0, 1.0]);
    }

    #[test]
    fn quads_are_triangulated() {
        let mesh = load("v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n");

        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.vertices.len(), 4);
    }

    #[test]
    fn missing_attributes_are_zero() {
        let mesh = load("v 0 1 2\nv 1 0 0\nv 0 0 1\nf 1 2 3\n");

        assert_eq!(mesh.vertices[0].pos, [0.0, -1.0, 2.0]);
        assert!(mesh.vertices.iter().all(|v| v.normal == [0.0; 3] && v.uv == [0.0; 2]));
    }

    #[test]
    fn same_position_with_different_normal_stays_distinct() {
        let mesh = load(
            "v 0 0 0\nv 1 0 0\nv 0 1 0\nvn 0 0 1\nvn 0 0 -1\nf 1//1 2//1 3//1\nf 1//2 3//2 2//2\n",
        );

        assert_eq!(mesh.vertices.len(), 6);
    }

    #[test]
    fn all_shapes_are_merged_into_one_mesh() {
        let source = format!("o first\n{QUAD}\no second\nf 1/1/1 2/2/1 3/3/1\n");
        let mesh = load(&source);

        assert_eq!(mesh.triangle_count(), 3);
        assert_eq!(mesh.vertices.len(), 4);
    }

    #[test]
    fn loading_twice_yields_unique_vertices_and_valid_indices() {
        let source = format!("{QUAD}\n{QUAD}");
        let mesh = load(&source);

        let unique = mesh.vertices.iter().collect::<HashSet<_>>();
        assert_eq!(unique.len(), mesh.vertices.len());
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_obj("does/not/exist.obj").is_err());
    }
}
