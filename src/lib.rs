// ABOUTME: Umbrella crate for hourglass, re-exporting the value engine and the save data manager.
// ABOUTME: Also provides the tracing setup hosts call once at startup.

pub use hourglass_core::*;
pub use hourglass_store::*;

/// Install a fmt subscriber filtered by RUST_LOG, defaulting to `hourglass=info`.
/// Returns false if a global subscriber was already installed.
pub fn init_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hourglass=info")),
        )
        .try_init()
        .is_ok()
}

/// Build a manager on the file slot selected by the environment.
pub fn manager_from_env() -> Result<SaveDataManager<FileSaveSlot>, ConfigError> {
    let config = StoreConfig::from_env()?;
    tracing::info!("using save file {}", config.save_path().display());
    Ok(SaveDataManager::new(FileSaveSlot::from_config(&config)).with_pretty(config.pretty))
}
