use anyhow::Result;

use engine::{Engine, EngineConfig};

fn main() -> Result<()> {
    pretty_env_logger::init();

    let engine = Engine::new(EngineConfig::default())?;
    engine.run()
}
