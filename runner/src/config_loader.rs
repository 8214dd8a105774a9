use config::load_config;
use config::shared::ImporterConfig;

/// Loads and validates the importer configuration from the `configuration` directory.
pub fn load_importer_config() -> anyhow::Result<ImporterConfig> {
    let config = load_config::<ImporterConfig>()?;

    Ok(config)
}
