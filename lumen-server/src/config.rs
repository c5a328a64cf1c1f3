//! Environment configuration. Everything has a deployment-friendly default
//! so the container runs with nothing but the two mounts.

use std::path::PathBuf;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    /// Read-only photo root (`PHOTOS_PATH`).
    pub photos_path: PathBuf,
    /// Read/write data root for db/, thumbs/, faces/, motion_videos/
    /// (`DATA_DIR`).
    pub data_dir: PathBuf,
    /// Filesystem watch debounce in seconds (`WATCH_INTERVAL`).
    pub watch_interval_secs: u64,
    /// Captioning/tagging endpoint base URL (`OLLAMA_URL`); empty disables.
    pub ollama_url: Option<String>,
    /// Vision model name at that endpoint (`OLLAMA_MODEL`).
    pub ollama_model: String,
    /// HTTP listen port (`SERVER_PORT`).
    pub server_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            photos_path: PathBuf::from("/photos"),
            data_dir: PathBuf::from("/data"),
            watch_interval_secs: 30,
            ollama_url: None,
            ollama_model: "llava".into(),
            server_port: 8080,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Config::default();

        let watch_interval_secs = match std::env::var("WATCH_INTERVAL") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("WATCH_INTERVAL must be seconds, got {raw:?}"))?,
            Err(_) => defaults.watch_interval_secs,
        };
        let server_port = match std::env::var("SERVER_PORT") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("SERVER_PORT must be a port, got {raw:?}"))?,
            Err(_) => defaults.server_port,
        };

        Ok(Self {
            photos_path: std::env::var("PHOTOS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.photos_path),
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            watch_interval_secs,
            ollama_url: std::env::var("OLLAMA_URL").ok(),
            ollama_model: std::env::var("OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
            server_port,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("db").join("lumen.db")
    }

    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        for dir in ["db", "thumbs", "faces", "motion_videos", "models"] {
            std::fs::create_dir_all(self.data_dir.join(dir))
                .with_context(|| format!("creating {}/{dir}", self.data_dir.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_mounts() {
        let config = Config::default();
        assert_eq!(config.photos_path, PathBuf::from("/photos"));
        assert_eq!(config.data_dir, PathBuf::from("/data"));
        assert_eq!(config.watch_interval_secs, 30);
        assert_eq!(config.server_port, 8080);
        assert!(config.ollama_url.is_none());
    }

    #[test]
    fn db_path_lives_under_the_data_dir() {
        let config = Config {
            data_dir: PathBuf::from("/tmp/lumen-data"),
            ..Default::default()
        };
        assert_eq!(config.db_path(), PathBuf::from("/tmp/lumen-data/db/lumen.db"));
    }
}
