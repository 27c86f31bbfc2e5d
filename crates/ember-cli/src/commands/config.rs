//! `ember config`: print the effective engine configuration.

use ember_engine::EngineConfig;

pub fn execute(config: &EngineConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}
