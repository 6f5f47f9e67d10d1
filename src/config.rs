use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::meta::SyncModel;
use crate::polling::{Bound, Classifier, MarkerCatalog, Watermark};
use crate::scheduler::Cadence;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub connector: ConnectorConfig,
    pub mapping: MappingConfig,
    pub listener: ListenerConfig,
    #[serde(default)]
    pub position: PositionConfig,
}

/// Connection details handed to the row reader untouched.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConnectorConfig {
    pub url: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MappingConfig {
    pub id: String,
    #[serde(default)]
    pub model: SyncModel,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListenerType {
    #[default]
    Timing,
    Log,
    Notification,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    #[serde(default)]
    pub listener_type: ListenerType,
    #[serde(default = "default_schedule")]
    pub schedule: String,
    /// Page size for polling reads
    #[serde(default = "default_read_num")]
    pub read_num: usize,
    #[serde(default)]
    pub event_field_name: String,
    /// Comma separated discriminator values
    #[serde(default)]
    pub update: String,
    #[serde(default)]
    pub insert: String,
    #[serde(default)]
    pub delete: String,
    #[serde(default)]
    pub commands: Vec<CommandConfig>,
    #[serde(default)]
    pub markers: Vec<MarkerConfig>,
    /// Column names per table for push notifications
    #[serde(default)]
    pub columns: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CommandConfig {
    pub table: String,
    pub query: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarkerConfig {
    pub literal: String,
    #[serde(default = "default_bound")]
    pub bound: Bound,
    pub default_value: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PositionConfig {
    #[serde(default = "default_position_path")]
    pub path: PathBuf,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            path: default_position_path(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        Self::build(config::File::from(path.as_ref()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, config::ConfigError> {
        Self::build(config::File::from_str(content, config::FileFormat::Toml))
    }

    fn build<S>(source: S) -> Result<Self, config::ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings = config::Config::builder()
            .add_source(source)
            .add_source(
                config::Environment::with_prefix("CDC_CAPTURE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.listener.read_num == 0 {
            return Err(config::ConfigError::Message(
                "listener.read_num must be positive".to_string(),
            ));
        }
        Cadence::parse(&self.listener.schedule)
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        if !self.listener.commands.is_empty() && self.listener.event_field_name.is_empty() {
            return Err(config::ConfigError::Message(
                "listener.event_field_name is required when commands are configured".to_string(),
            ));
        }
        // Blank values would be persisted and fail to parse on the next run
        for marker in &self.listener.markers {
            if marker.literal.trim().is_empty() {
                return Err(config::ConfigError::Message(
                    "listener.markers literal must not be blank".to_string(),
                ));
            }
            if marker.default_value.trim().is_empty() {
                return Err(config::ConfigError::Message(format!(
                    "listener.markers default_value for {} must not be blank",
                    marker.literal
                )));
            }
        }
        Ok(())
    }

    /// Built-in markers followed by the configured ones.
    pub fn marker_catalog(&self) -> MarkerCatalog {
        self.listener
            .markers
            .iter()
            .fold(MarkerCatalog::new(), |catalog, m| {
                catalog.with_marker(Watermark::custom(&m.literal, m.bound, &m.default_value))
            })
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::new(
            &self.listener.event_field_name,
            &self.listener.update,
            &self.listener.insert,
            &self.listener.delete,
        )
    }

    /// Scheduler key for this mapping's polling task.
    pub fn task_key(&self) -> String {
        format!("{}-{}", self.mapping.id, self.listener.schedule)
    }
}

fn default_read_num() -> usize {
    10_000
}

fn default_schedule() -> String {
    "*/10 * * * * ?".to_string()
}

fn default_bound() -> Bound {
    Bound::Begin
}

fn default_position_path() -> PathBuf {
    PathBuf::from("positions.json")
}
