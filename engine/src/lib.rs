#![allow(clippy::too_many_arguments)]

use std::path::PathBuf;

use anyhow::Result;
use renderer::Renderer;
use winit::dpi::LogicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::EventLoop;
use winit::window::{Window, WindowBuilder};

pub mod assets;
pub mod mesh;
pub mod scene;

mod renderer;
mod vulkan;

/// Startup settings. There is no command-line surface; callers fill this
/// in directly (or take the defaults, which pick up `mesh.obj` and
/// `texture.png` from the working directory when they exist).
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// OBJ mesh to display; `None` renders the built-in triangle.
    pub mesh: Option<PathBuf>,
    /// PNG texture; `None` uses a 1x1 white placeholder.
    pub texture: Option<PathBuf>,
    /// Pre-compiled SPIR-V, read from disk at startup.
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Mesh Viewer".to_string(),
            width: 500,
            height: 500,
            mesh: Some(PathBuf::from("mesh.obj")).filter(|p| p.exists()),
            texture: Some(PathBuf::from("texture.png")).filter(|p| p.exists()),
            vertex_shader: PathBuf::from("shaders/vert.spv"),
            fragment_shader: PathBuf::from("shaders/frag.spv"),
        }
    }
}

pub struct Engine {
    window: Window,
    renderer: Renderer,
    event_loop: EventLoop<()>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Engine> {
        // Window
        let event_loop = EventLoop::new()?;
        let window = WindowBuilder::new()
            .with_title(&config.title)
            .with_inner_size(LogicalSize::new(config.width, config.height))
            .build(&event_loop)?;

        let renderer = unsafe { Renderer::create(&window, &config)? };

        Ok(Engine {
            window,
            renderer,
            event_loop,
        })
    }

    /// Renders a fixed number of frames without entering the event
    /// loop. The window processes no events meanwhile; this exists for
    /// smoke testing the full render path.
    pub fn render_frames(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            unsafe { self.renderer.render(&self.window)? };
        }
        Ok(())
    }

    /// Tears the renderer down without entering the event loop.
    pub fn destroy(mut self) {
        unsafe { self.renderer.destroy() };
    }

    pub fn run(mut self) -> Result<()> {
        self.event_loop.run(move |event, elwt| {
            match event {
                // Request a redraw when all events were processed.
                Event::AboutToWait => self.window.request_redraw(),
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::RedrawRequested if !elwt.exiting() => {
                        if let Err(err) = unsafe { self.renderer.render(&self.window) } {
                            // No recovery path: a failed acquire, submit or
                            // present ends the process.
                            log::error!("frame failed: {err:#}");
                            unsafe {
                                self.renderer.destroy();
                            }
                            std::process::exit(1);
                        }
                    }
                    WindowEvent::CloseRequested => {
                        elwt.exit();
                        unsafe {
                            self.renderer.destroy();
                        }
                    }
                    _ => {}
                },
                _ => {}
            }
        })?;

        Ok(())
    }
}
