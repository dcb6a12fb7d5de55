use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{CoreError, CoreErrorKind, DataItemCategory, ReferenceKind};

pub type ConfigResult<T> = Result<T, CoreError>;

pub const WORKER_THREADS: &str = "WorkerThreads";
pub const PRESERVE_UUID: &str = "PreserveUUID";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    StringList(Vec<String>),
    Seconds { seconds: u64 },
    Milliseconds { milliseconds: u64 },
}

/// Typed key/value options. A missing key is the "absent" value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigOptions {
    values: BTreeMap<String, ConfigValue>,
}

impl ConfigOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: ConfigValue) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ConfigValue) -> Option<ConfigValue> {
        self.values.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            ConfigValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn get_integer(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            ConfigValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            ConfigValue::Double(value) => Some(*value),
            ConfigValue::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            ConfigValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn get_string_list(&self, key: &str) -> Option<&[String]> {
        match self.get(key)? {
            ConfigValue::StringList(values) => Some(values),
            _ => None,
        }
    }

    pub fn get_duration(&self, key: &str) -> Option<Duration> {
        match self.get(key)? {
            ConfigValue::Seconds { seconds } => Some(Duration::from_secs(*seconds)),
            ConfigValue::Milliseconds { milliseconds } => {
                Some(Duration::from_millis(*milliseconds))
            }
            _ => None,
        }
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    pub fn get_integer_or(&self, key: &str, default: i64) -> i64 {
        self.get_integer(key).unwrap_or(default)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataItemConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub data_item_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub category: DataItemCategory,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceConfig {
    pub kind: ReferenceKind,
    pub id_ref: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentConfig {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub components: Vec<ComponentConfig>,
    #[serde(default)]
    pub data_items: Vec<DataItemConfig>,
    #[serde(default)]
    pub references: Vec<ReferenceConfig>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub mtconnect_version: Option<String>,
    #[serde(default)]
    pub components: Vec<ComponentConfig>,
    #[serde(default)]
    pub data_items: Vec<DataItemConfig>,
    #[serde(default)]
    pub references: Vec<ReferenceConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub options: ConfigOptions,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl AgentConfig {
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|error| {
            CoreError::new(
                CoreErrorKind::ParseFailure,
                format!("failed to parse agent configuration: {error}"),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|error| {
            CoreError::new(
                CoreErrorKind::Io,
                format!("failed to read '{}': {error}", path.display()),
            )
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(value) = self.options.get(WORKER_THREADS)
            && !matches!(value, ConfigValue::Integer(_))
        {
            return Err(CoreError::new(
                CoreErrorKind::InvalidConfig,
                format!("option '{WORKER_THREADS}' must be an integer, got {value:?}"),
            ));
        }

        if let Some(value) = self.options.get(PRESERVE_UUID)
            && !matches!(value, ConfigValue::Bool(_))
        {
            return Err(CoreError::new(
                CoreErrorKind::InvalidConfig,
                format!("option '{PRESERVE_UUID}' must be a boolean, got {value:?}"),
            ));
        }

        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(CoreError::new(
                    CoreErrorKind::InvalidConfig,
                    "device name must not be empty",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{AgentConfig, ConfigOptions, ConfigValue, WORKER_THREADS};
    use crate::models::CoreErrorKind;

    #[test]
    fn untagged_values_deserialize_to_their_natural_variant() {
        let options: ConfigOptions = serde_json::from_str(
            r#"{
                "WorkerThreads": 4,
                "PreserveUUID": true,
                "Ratio": 0.5,
                "Name": "agent",
                "Files": ["a", "b"],
                "Timeout": { "seconds": 30 },
                "Heartbeat": { "milliseconds": 250 }
            }"#,
        )
        .unwrap();

        assert_eq!(options.get_integer(WORKER_THREADS), Some(4));
        assert_eq!(options.get_bool("PreserveUUID"), Some(true));
        assert_eq!(options.get_double("Ratio"), Some(0.5));
        assert_eq!(options.get_string("Name"), Some("agent"));
        assert_eq!(
            options.get_string_list("Files"),
            Some(&["a".to_string(), "b".to_string()][..])
        );
        assert_eq!(
            options.get_duration("Timeout"),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            options.get_duration("Heartbeat"),
            Some(Duration::from_millis(250))
        );
        assert_eq!(options.get("Missing"), None);
    }

    #[test]
    fn mistyped_thread_count_is_rejected() {
        let json = r#"{ "options": { "WorkerThreads": "four" } }"#;
        let error = AgentConfig::from_json(json).unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::InvalidConfig);
    }

    #[test]
    fn typed_getters_do_not_coerce_between_kinds() {
        let flag = ConfigValue::String("true".into());
        let options = ConfigOptions::new().with("Flag", flag);
        assert_eq!(options.get_bool("Flag"), None);
        assert!(!options.get_bool_or("Flag", false));
    }
}
