use std::time::Instant;

use anyhow::Result;
use winit::window::Window;

use crate::assets::ImageData;
use crate::mesh::Mesh;
use crate::scene::Scene;
use crate::vulkan::VulkanRenderer;
use crate::EngineConfig;

/// Façade over the Vulkan renderer: loads the assets, keeps the scene
/// description and the clock driving the rotating model transform.
pub struct Renderer {
    vk_renderer: VulkanRenderer,
    scene: Scene,
    started: Instant,
}

impl Renderer {
    pub unsafe fn create(window: &Window, config: &EngineConfig) -> Result<Self> {
        let mesh = match &config.mesh {
            Some(path) => Mesh::load(path)?,
            None => Mesh::triangle(),
        };
        let texture = match &config.texture {
            Some(path) => ImageData::load(path)?,
            None => ImageData::white(),
        };

        let vk_renderer = VulkanRenderer::new(window, config, &mesh, &texture)?;

        Ok(Self {
            vk_renderer,
            scene: Scene::default(),
            started: Instant::now(),
        })
    }

    /// Renders one frame with the model rotated for the current time.
    pub unsafe fn render(&mut self, _window: &Window) -> Result<()> {
        let elapsed = self.started.elapsed().as_secs_f32();
        let uniform = self.scene.uniform(self.vk_renderer.aspect_ratio(), elapsed);
        self.vk_renderer.render(&uniform)
    }

    pub unsafe fn destroy(&mut self) {
        self.vk_renderer.destroy();
    }
}
