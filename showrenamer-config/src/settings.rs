//! `settings.toml`: runtime knobs read once at startup.

use std::fs;
use std::path::Path;

use anyhow::{Context, anyhow};
use showrenamer_core::RenamerSettings;
use tracing::info;

/// Reads `path`, writing the defaults first if it does not exist.
pub fn load_or_create_settings(path: &Path) -> anyhow::Result<RenamerSettings> {
    if !path.exists() {
        let defaults = RenamerSettings::default();
        let body = toml::to_string(&defaults).context("failed to serialize default settings")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, body)
            .with_context(|| format!("failed to write default settings to {}", path.display()))?;
        info!(file = %path.display(), "created default settings");
        return Ok(defaults);
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings from {}", path.display()))?;
    parse_settings(&contents).map_err(|err| anyhow!("invalid settings {}: {err}", path.display()))
}

/// Parses a `settings.toml` body; missing keys take their defaults.
pub fn parse_settings(contents: &str) -> Result<RenamerSettings, toml::de::Error> {
    toml::from_str(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");

        let settings = load_or_create_settings(&path).unwrap();
        assert_eq!(settings, RenamerSettings::default());
        assert_eq!(load_or_create_settings(&path).unwrap(), settings);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let settings = parse_settings(
            r#"
            language = "eng"

            [watch]
            stability_period_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(settings.language, "eng");
        assert_eq!(settings.cache_ttl_days, 7);
        assert_eq!(settings.watch.stability_period_secs, 5);
        assert_eq!(settings.watch.retry_interval_secs, 86_400);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "match_threshold = \"high\"").unwrap();

        let err = load_or_create_settings(&path).unwrap_err();
        assert!(err.to_string().contains("invalid settings"));
    }
}
