//! Shared CLI helpers for workspace tools.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{Error, Result};

/// Installs the global subscriber. `RUST_LOG` wins over the verbosity flag.
pub fn setup_cli_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logger: {e}")))?;

    Ok(())
}

pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config {}: {e}", path.display())))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config {}: {e}", path.display())))
}

/// Human-readable byte size ("12.3 KB", "4.00 MB").
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let b = bytes as f64;
    if b >= MB {
        format!("{:.2} MB", b / MB)
    } else {
        format!("{:.1} KB", b / KB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrainingConfig;
    use tempfile::TempDir;

    #[test]
    fn test_load_toml_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("train.toml");
        fs::write(&path, "[transfer]\nepochs = 3\nlearning_rate = 0.01\nunfreeze_layers = 0\n").unwrap();

        let config: TrainingConfig = load_toml_config(&path).unwrap();
        assert_eq!(config.transfer.epochs, 3);
        assert_eq!(config.fine_tune.epochs, 5);
    }

    #[test]
    fn test_load_missing_config() {
        let result: Result<TrainingConfig> = load_toml_config(Path::new("/nonexistent/train.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(4 * 1024 * 1024), "4.00 MB");
    }
}
