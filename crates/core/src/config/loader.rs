//! Loader for `windflow.toml`.

use crate::config::error::ConfigError;
use crate::config::error::ConfigResult;
use crate::config::models::AppConfig;
use std::path::Path;

/// Default configuration file name.
pub const CONFIG_FILE: &str = "windflow.toml";

/// Loads process-wide configuration from `path`.
///
/// Relative directories in the file are resolved against the file's parent
/// directory.
///
/// # Returns
///
/// The parsed configuration. If the file does not exist, the defaults are
/// returned (resolved against the parent directory) rather than an error.
///
/// # Errors
///
/// Returns `ConfigError` if:
/// - The file exists but cannot be read
/// - The file is not valid TOML
/// - The shell or fatal marker is empty
pub fn load_config(path: &Path) -> ConfigResult<AppConfig> {
    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    if !path.exists() {
        return Ok(AppConfig::default().resolve_paths(base));
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let config: AppConfig = toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
        path: path.to_path_buf(),
        source,
    })?;

    validate(&config, path)?;

    Ok(config.resolve_paths(base))
}

fn validate(config: &AppConfig, path: &Path) -> ConfigResult<()> {
    if config.shell.as_os_str().is_empty() {
        return Err(ConfigError::InvalidConfig {
            path: path.to_path_buf(),
            reason: "shell must not be empty".to_string(),
        });
    }
    if config.fatal_marker.trim().is_empty() {
        return Err(ConfigError::InvalidConfig {
            path: path.to_path_buf(),
            reason: "fatal_marker must not be empty".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_resolved_defaults() {
        let dir = tempdir().expect("Failed to create temp dir");
        let config = load_config(&dir.path().join(CONFIG_FILE)).expect("Should default");

        assert_eq!(config.replay_lines, 50);
        assert_eq!(config.fatal_marker, "FOAM FATAL ERROR");
        assert_eq!(config.logs_dir, dir.path().join("logs"));
        assert_eq!(config.run_dir("r1"), dir.path().join("runs").join("r1"));
    }

    #[test]
    fn test_partial_file_overrides_and_resolves() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"
toolkit_env = ""
logs_dir = "/var/log/windflow"
metadata_dir = "meta"
replay_lines = 100
"#,
        )
        .expect("Failed to write config");

        let config = load_config(&path).expect("Should load");

        assert!(config.toolkit_env().is_none());
        assert_eq!(config.logs_dir, PathBuf::from("/var/log/windflow"));
        assert_eq!(config.metadata_dir, dir.path().join("meta"));
        assert_eq!(config.replay_lines, 100);
        assert_eq!(config.tail_lines, 50);
        assert_eq!(config.shell, PathBuf::from("/bin/bash"));
    }

    #[test]
    fn test_invalid_toml() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "replay_lines = [oops").expect("Failed to write config");

        match load_config(&path) {
            Err(ConfigError::TomlParse { path, .. }) => assert!(path.ends_with(CONFIG_FILE)),
            other => panic!("Expected TomlParse error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_shell_is_rejected() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "shell = \"\"").expect("Failed to write config");

        assert!(matches!(
            load_config(&path),
            Err(ConfigError::InvalidConfig { .. })
        ));
    }
}
