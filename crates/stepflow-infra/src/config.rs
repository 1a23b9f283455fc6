//! Engine configuration loader.
//!
//! Reads `stepflow.toml` and deserializes it into [`EngineConfig`]. A missing
//! file yields the defaults; an unreadable or malformed file is an error so a
//! typo never silently runs with default limits.

use std::path::{Path, PathBuf};

use stepflow_types::config::EngineConfig;

/// File name looked up in the working directory and the user config dir.
pub const CONFIG_FILE_NAME: &str = "stepflow.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Load engine configuration from `path`.
pub async fn load_engine_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(EngineConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    toml::from_str::<EngineConfig>(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// The config path to use when none is given: `./stepflow.toml` if present,
/// else `<config dir>/stepflow/stepflow.toml`.
pub fn default_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|dir| dir.join("stepflow").join(CONFIG_FILE_NAME))
        .unwrap_or(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(&tmp.path().join(CONFIG_FILE_NAME)).await.unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(
            &path,
            r#"
history_limit = 10

[timeouts]
code_ms = 500

[llm]
api_key_env = "MY_KEY"
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(&path).await.unwrap();
        assert_eq!(config.history_limit, 10);
        assert_eq!(config.timeouts.code_ms, 500);
        assert_eq!(config.timeouts.http_ms, 30_000);
        assert_eq!(config.llm.api_key_env, "MY_KEY");
    }

    #[tokio::test]
    async fn load_engine_config_invalid_toml_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(&path, "this is not { valid toml !!!").await.unwrap();

        let err = load_engine_config(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("stepflow.toml"), "got: {err}");
    }
}
