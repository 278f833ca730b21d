use std::mem::size_of;

use cgmath::{perspective, Deg, Matrix4, Point3, Vector3};

pub type Mat4 = Matrix4<f32>;

/// Matrices handed to the vertex shader each frame, in declaration
/// order. `Matrix4<f32>` is `repr(C)`, column-major, matching std140
/// layout for a block of mat4s.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct SceneUniform {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
    pub clip: Mat4,
}

impl SceneUniform {
    pub fn bytes(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(
                (self as *const SceneUniform).cast::<u8>(),
                size_of::<SceneUniform>(),
            )
        }
    }
}

/// Fixed camera looking at the origin; the model spins around Y.
#[derive(Clone, Debug)]
pub struct Scene {
    pub camera: Point3<f32>,
    pub origin: Point3<f32>,
    pub up: Vector3<f32>,
    /// Degrees per second of model rotation.
    pub spin: f32,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            camera: Point3::new(3.0, 5.0, 10.0),
            origin: Point3::new(0.0, 0.0, 0.0),
            up: Vector3::new(0.0, 1.0, 0.0),
            spin: 45.0,
        }
    }
}

impl Scene {
    pub fn uniform(&self, aspect: f32, elapsed_secs: f32) -> SceneUniform {
        SceneUniform {
            model: Mat4::from_angle_y(Deg(self.spin * elapsed_secs)),
            view: Mat4::look_at_rh(self.camera, self.origin, self.up),
            proj: perspective(Deg(45.0), aspect, 0.1, 100.0),
            clip: clip_correction(),
        }
    }
}

/// GL clip space to Vulkan clip space: Y points down, depth is [0, 1].
pub fn clip_correction() -> Mat4 {
    #[rustfmt::skip]
    let clip = Mat4::new(
        1.0,  0.0, 0.0, 0.0,
        0.0, -1.0, 0.0, 0.0,
        0.0,  0.0, 0.5, 0.0,
        0.0,  0.0, 0.5, 1.0,
    );
    clip
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{vec4, SquareMatrix};

    #[test]
    fn uniform_is_four_matrices() {
        assert_eq!(size_of::<SceneUniform>(), 4 * 16 * size_of::<f32>());
        let uniform = Scene::default().uniform(1.0, 0.0);
        assert_eq!(uniform.bytes().len(), size_of::<SceneUniform>());
    }

    #[test]
    fn model_starts_as_identity() {
        let uniform = Scene::default().uniform(1.0, 0.0);
        assert_eq!(uniform.model, Mat4::identity());
    }

    #[test]
    fn clip_correction_flips_y_and_halves_depth() {
        let clip = clip_correction();
        let v = clip * vec4(0.0, 1.0, 1.0, 1.0);
        assert_eq!(v.y, -1.0);
        assert_eq!(v.z, 1.0); // 0.5 * z + 0.5 * w
        let origin = clip * vec4(0.0, 0.0, 0.0, 1.0);
        assert_eq!(origin.z, 0.5);
    }
}
