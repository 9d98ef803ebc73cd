//! Application configuration.
//!
//! Priority: CLI flag > CLI env var > `CHATBOT_*` env vars > config file >
//! defaults. The config file is `--config`/`CONFIG_FILE` when given,
//! otherwise `./config.{yaml,toml,json}` if one exists.

use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::credentials::{CredentialSettings, DEFAULT_BINDING_VAR, DEFAULT_SOURCE_VAR};
use crate::render::{Granularity, PresentationMode, ResponseRenderer};
use crate::session::HistoryRetention;
use crate::vertex::{
    DEFAULT_DATASTORE, DEFAULT_LOCATION, DEFAULT_MODEL, DEFAULT_PROJECT,
    DEFAULT_SYSTEM_INSTRUCTION, VertexSettings,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Address to bind
    #[arg(long, env = "BIND_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Reply presentation: atomic or incremental
    #[arg(long, env = "PRESENTATION_MODE")]
    pub presentation_mode: Option<String>,

    /// Delay between revealed pieces in incremental mode
    #[arg(long, env = "TYPING_DELAY_MS")]
    pub typing_delay_ms: Option<u64>,

    /// Keep at most this many turns of local history per session
    #[arg(long, env = "HISTORY_MAX_TURNS")]
    pub history_max_turns: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: VertexSettings,
    pub credentials: CredentialSettings,
    pub presentation: PresentationConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PresentationConfig {
    pub mode: PresentationMode,
    pub granularity: Granularity,
    pub delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct HistoryConfig {
    #[serde(default)]
    pub max_turns: Option<usize>,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl From<&PresentationConfig> for ResponseRenderer {
    fn from(cfg: &PresentationConfig) -> Self {
        match cfg.mode {
            PresentationMode::Atomic => Self::atomic(),
            PresentationMode::Incremental => {
                Self::incremental(cfg.granularity, Duration::from_millis(cfg.delay_ms))
            }
        }
    }
}

impl From<&HistoryConfig> for HistoryRetention {
    fn from(cfg: &HistoryConfig) -> Self {
        Self {
            max_turns: cfg.max_turns,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        // 1. Defaults
        let mut builder = Config::builder()
            .set_default("server.port", 8080)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.request_timeout_secs", 120)?
            .set_default("model.project", DEFAULT_PROJECT)?
            .set_default("model.location", DEFAULT_LOCATION)?
            .set_default("model.model", DEFAULT_MODEL)?
            .set_default("model.datastore", DEFAULT_DATASTORE)?
            .set_default("model.system_instruction", DEFAULT_SYSTEM_INSTRUCTION)?
            .set_default("credentials.env_var", DEFAULT_SOURCE_VAR)?
            .set_default("credentials.binding_var", DEFAULT_BINDING_VAR)?
            .set_default("presentation.mode", "incremental")?
            .set_default("presentation.granularity", "fragment")?
            .set_default("presentation.delay_ms", 100)?;

        // 2. Config file
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        // 3. Environment variables, e.g. CHATBOT_SERVER__PORT=9000
        builder = builder.add_source(
            Environment::with_prefix("CHATBOT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // 4. CLI (flags and their env fallbacks)
        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(mode) = cli.presentation_mode {
            builder = builder.set_override("presentation.mode", mode.to_lowercase())?;
        }
        if let Some(delay) = cli.typing_delay_ms {
            builder = builder.set_override("presentation.delay_ms", delay)?;
        }
        if let Some(max) = cli.history_max_turns {
            builder = builder.set_override("history.max_turns", max)?;
        }

        builder.build()?.try_deserialize()
    }
}
