use std::path::PathBuf;

use engine::{Engine, EngineConfig};

// Boots the whole stack and renders a few frames. Needs a window
// system, a Vulkan driver and compiled shaders, so it only runs when
// invoked explicitly.
#[test]
#[ignore]
fn boots_and_renders_three_frames() {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf();

    let config = EngineConfig {
        title: "boot test".to_string(),
        mesh: None,
        texture: None,
        vertex_shader: root.join("shaders/vert.spv"),
        fragment_shader: root.join("shaders/frag.spv"),
        ..EngineConfig::default()
    };

    let mut engine = Engine::new(config).unwrap();
    engine.render_frames(3).unwrap();
    engine.destroy();
}
