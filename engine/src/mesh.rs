use std::fs::File;
use std::io::BufReader;
use std::mem::size_of;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use cgmath::{vec2, vec3, Vector2, Vector3};
use vulkanalia::vk::{self, HasBuilder};

/// One mesh vertex, laid out to match the vertex shader inputs.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Vertex {
    pub position: Vector3<f32>,
    pub normal: Vector3<f32>,
    pub uv: Vector2<f32>,
}

impl Vertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        let position = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(0)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(0)
            .build();
        let normal = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(1)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(size_of::<Vector3<f32>>() as u32)
            .build();
        let uv = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(2)
            .format(vk::Format::R32G32_SFLOAT)
            .offset((size_of::<Vector3<f32>>() * 2) as u32)
            .build();
        [position, normal, uv]
    }
}

/// A flat, non-indexed vertex list; the draw call uses `vertex_count`
/// with one instance.
#[derive(Clone, Debug)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
}

impl Mesh {
    /// Loads an OBJ file, triangulated, with every face index validated
    /// against the attribute arrays it references. Out-of-range indices
    /// are a load failure here, never a renderer concern.
    pub fn load(path: &Path) -> Result<Mesh> {
        let file = File::open(path)
            .with_context(|| format!("failed to open mesh `{}`", path.display()))?;
        let mut reader = BufReader::new(file);

        let (models, _) = tobj::load_obj_buf(
            &mut reader,
            &tobj::LoadOptions {
                triangulate: true,
                single_index: true,
                ..Default::default()
            },
            // Materials are not used; report them as absent.
            |_| Err(tobj::LoadError::GenericFailure),
        )
        .with_context(|| format!("failed to parse mesh `{}`", path.display()))?;

        let mut vertices = Vec::new();
        for model in &models {
            let mesh = &model.mesh;
            for &index in &mesh.indices {
                let i = index as usize;
                if i * 3 + 2 >= mesh.positions.len() {
                    return Err(anyhow!(
                        "mesh `{}`: vertex index {} out of range",
                        path.display(),
                        index
                    ));
                }
                let position = vec3(
                    mesh.positions[i * 3],
                    mesh.positions[i * 3 + 1],
                    mesh.positions[i * 3 + 2],
                );
                let normal = if mesh.normals.is_empty() {
                    vec3(0.0, 0.0, 1.0)
                } else if i * 3 + 2 < mesh.normals.len() {
                    vec3(
                        mesh.normals[i * 3],
                        mesh.normals[i * 3 + 1],
                        mesh.normals[i * 3 + 2],
                    )
                } else {
                    return Err(anyhow!(
                        "mesh `{}`: normal index {} out of range",
                        path.display(),
                        index
                    ));
                };
                let uv = if mesh.texcoords.is_empty() {
                    vec2(0.0, 0.0)
                } else if i * 2 + 1 < mesh.texcoords.len() {
                    vec2(mesh.texcoords[i * 2], mesh.texcoords[i * 2 + 1])
                } else {
                    return Err(anyhow!(
                        "mesh `{}`: texcoord index {} out of range",
                        path.display(),
                        index
                    ));
                };
                vertices.push(Vertex {
                    position,
                    normal,
                    uv,
                });
            }
        }

        if vertices.is_empty() {
            return Err(anyhow!("mesh `{}` contains no faces", path.display()));
        }

        log::info!("Loaded mesh `{}` ({} vertices).", path.display(), vertices.len());
        Ok(Mesh { vertices })
    }

    /// Fallback content when no mesh file is configured.
    pub fn triangle() -> Mesh {
        Mesh {
            vertices: vec![
                Vertex {
                    position: vec3(-1.0, 0.0, 0.0),
                    normal: vec3(0.0, 0.0, 1.0),
                    uv: vec2(1.0, 1.0),
                },
                Vertex {
                    position: vec3(0.0, 1.0, 0.0),
                    normal: vec3(0.0, 0.0, 1.0),
                    uv: vec2(1.0, 0.0),
                },
                Vertex {
                    position: vec3(1.0, 0.0, 0.0),
                    normal: vec3(0.0, 0.0, 1.0),
                    uv: vec2(0.0, 1.0),
                },
            ],
        }
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn byte_len(&self) -> usize {
        self.vertices.len() * size_of::<Vertex>()
    }

    /// Raw bytes for the vertex-buffer upload. `Vertex` is `repr(C)` and
    /// holds only `f32` fields.
    pub fn bytes(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(self.vertices.as_ptr().cast::<u8>(), self.byte_len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn write_obj(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}.obj", name, std::process::id()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn binding_covers_whole_vertex() {
        let binding = Vertex::binding_description();
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.stride as usize, size_of::<Vertex>());
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
    }

    #[test]
    fn attributes_are_position_normal_uv() {
        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[0].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[1].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(attributes[2].offset, 24);
        assert_eq!(attributes[2].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn loads_a_single_triangle() {
        let path = write_obj("triangle", "v -1 0 0\nv 0 1 0\nv 1 0 0\nf 1 2 3\n");
        let mesh = Mesh::load(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.vertices[0].position, vec3(-1.0, 0.0, 0.0));
        // Absent normal/texcoord arrays fall back to the defaults.
        assert_eq!(mesh.vertices[0].normal, vec3(0.0, 0.0, 1.0));
        assert_eq!(mesh.vertices[0].uv, vec2(0.0, 0.0));
    }

    #[test]
    fn loads_normals_and_texcoords() {
        let path = write_obj(
            "textured",
            "v 0 0 0\nv 1 0 0\nv 0 1 0\nvt 0 0\nvt 1 0\nvt 0 1\nvn 0 0 1\nf 1/1/1 2/2/1 3/3/1\n",
        );
        let mesh = Mesh::load(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.vertices[1].uv, vec2(1.0, 0.0));
        assert_eq!(mesh.vertices[2].normal, vec3(0.0, 0.0, 1.0));
    }

    #[test]
    fn out_of_range_face_index_fails() {
        // The face references a third vertex that does not exist.
        let path = write_obj("bad-index", "v 0 0 0\nv 1 0 0\nf 1 2 3\n");
        let result = Mesh::load(&path);
        fs::remove_file(&path).ok();
        assert!(result.is_err());
    }

    #[test]
    fn mesh_without_faces_fails() {
        let path = write_obj("no-faces", "v 0 0 0\nv 1 0 0\nv 0 1 0\n");
        let result = Mesh::load(&path);
        fs::remove_file(&path).ok();
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_fails() {
        assert!(Mesh::load(Path::new("definitely-not-here.obj")).is_err());
    }

    #[test]
    fn triangle_fallback_has_three_vertices() {
        let mesh = Mesh::triangle();
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.byte_len(), 3 * size_of::<Vertex>());
        assert_eq!(mesh.bytes().len(), mesh.byte_len());
    }
}
