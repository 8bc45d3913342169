use anyhow::{Context, Result};
use copilot_stream::AskOptions;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [ask]
//                    timeout_secs = 90
//
//   env var:         PIECES_ASK__TIMEOUT_SECS=90   (double underscore = nesting)

/// Ports PiecesOS may bind to, tried in order during discovery.
pub const PIECES_PORT_RANGE: RangeInclusive<u16> = 39300..=39333;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub pieces: PiecesFileConfig,
    #[serde(default)]
    pub ask: AskFileConfig,
}

/// Where to find PiecesOS (lives under `[pieces]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PiecesFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Scan the rest of the port range when `port` does not answer.
    #[serde(default = "default_scan_ports")]
    pub scan_ports: bool,
}

impl Default for PiecesFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            scan_ports: default_scan_ports(),
        }
    }
}

/// Copilot tunables (lives under `[ask]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AskFileConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for AskFileConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl AskFileConfig {
    pub fn ask_options(&self) -> AskOptions {
        AskOptions {
            answer_timeout: Duration::from_secs(self.timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    *PIECES_PORT_RANGE.start()
}
fn default_scan_ports() -> bool {
    true
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_connect_timeout_secs() -> u64 {
    5
}

/// Build a figment that layers: defaults → config.toml → PIECES_* env vars.
///
/// CLI flags are applied on top by the caller after extraction.
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("PIECES_").split("__"))
}

// =============================================================================
// Directory layout (derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct PiecesCliConfig {
    pub data_dir: PathBuf,
}

impl PiecesCliConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".pieces-cli"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        debug!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    /// Extract the layered file config for this data dir.
    pub fn file_config(&self) -> Result<FileConfig> {
        load_config(&self.data_dir)
            .extract()
            .with_context(|| format!("Invalid config in {}", self.config_toml_path().display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_config_defaults() {
        let fc = FileConfig::default();
        assert_eq!(fc.pieces.host, "127.0.0.1");
        assert_eq!(fc.pieces.port, 39300);
        assert!(fc.pieces.scan_ports);
        assert_eq!(fc.ask.timeout_secs, 60);
        assert_eq!(fc.ask.connect_timeout_secs, 5);
    }

    #[test]
    fn test_ask_options_from_file() {
        let fc = AskFileConfig {
            timeout_secs: 90,
            connect_timeout_secs: 2,
            ..Default::default()
        };
        let opts = fc.ask_options();
        assert_eq!(opts.answer_timeout, Duration::from_secs(90));
        assert_eq!(opts.connect_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_load_config_reads_toml() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[pieces]\nport = 39310\nscan_ports = false\n\n[ask]\nmodel = \"claude-sonnet\"\n",
        )
        .unwrap();

        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.pieces.port, 39310);
        assert!(!fc.pieces.scan_ports);
        assert_eq!(fc.pieces.host, "127.0.0.1");
        assert_eq!(fc.ask.model, "claude-sonnet");
        assert_eq!(fc.ask.timeout_secs, 60);
    }

    #[test]
    fn test_load_config_env_overrides_toml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[ask]\nconnect_timeout_secs = 3\n")?;
            jail.set_env("PIECES_ASK__CONNECT_TIMEOUT_SECS", "9");

            let fc: FileConfig = load_config(jail.directory()).extract()?;
            assert_eq!(fc.ask.connect_timeout_secs, 9);
            Ok(())
        });
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.pieces.port, 39300);
        assert_eq!(fc.ask.model, "gpt-4o-mini");
    }

    #[test]
    fn test_pieces_cli_config_with_custom_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PiecesCliConfig::new(Some(tmp.path().to_path_buf())).unwrap();

        assert_eq!(config.data_dir, tmp.path());
        assert_eq!(config.config_toml_path(), tmp.path().join("config.toml"));
    }
}
