//! Hierarchical key/value configuration store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::parse_duration;
use crate::error::ConfigError;

/// Hierarchical configuration, addressed by a path of object keys
pub trait ConfigStore: Send + Sync {
    fn get(&self, path: &[&str]) -> ConfigValue;

    fn set(&self, value: Value, path: &[&str]) -> Result<(), ConfigError>;

    fn delete(&self, path: &[&str]) -> Result<(), ConfigError>;
}

/// Result of a store lookup, with typed accessors
///
/// A missing key reads as JSON `null`, so every typed accessor returns
/// `None` and every `_or` accessor returns its default.
#[derive(Debug)]
pub struct ConfigValue {
    inner: Result<Value, ConfigError>,
}

impl ConfigValue {
    pub fn new(value: Value) -> Self {
        Self { inner: Ok(value) }
    }

    pub fn from_error(err: ConfigError) -> Self {
        Self { inner: Err(err) }
    }

    /// The error that prevented the lookup, if any
    pub fn error(&self) -> Option<&ConfigError> {
        self.inner.as_ref().err()
    }

    pub fn value(&self) -> Option<&Value> {
        self.inner.as_ref().ok()
    }

    pub fn is_missing(&self) -> bool {
        matches!(self.value(), None | Some(Value::Null))
    }

    /// The value rendered as JSON text
    pub fn raw(&self) -> String {
        self.value().unwrap_or(&Value::Null).to_string()
    }

    /// Deserialize the value into `T`
    pub fn scan<T: for<'de> Deserialize<'de>>(self) -> Result<T, ConfigError> {
        let value = self.inner?;
        Ok(T::deserialize(value)?)
    }

    pub fn string(&self) -> Option<&str> {
        self.value().and_then(Value::as_str)
    }

    pub fn string_or(&self, default: &str) -> String {
        self.string().unwrap_or(default).to_string()
    }

    pub fn i32(&self) -> Option<i32> {
        self.value()
            .and_then(Value::as_f64)
            .map(|n| n as i32)
    }

    pub fn i32_or(&self, default: i32) -> i32 {
        self.i32().unwrap_or(default)
    }

    pub fn i64(&self) -> Option<i64> {
        self.value()
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|n| n as i64)))
    }

    pub fn i64_or(&self, default: i64) -> i64 {
        self.i64().unwrap_or(default)
    }

    pub fn f64(&self) -> Option<f64> {
        self.value().and_then(Value::as_f64)
    }

    pub fn f64_or(&self, default: f64) -> f64 {
        self.f64().unwrap_or(default)
    }

    pub fn bool(&self) -> Option<bool> {
        self.value().and_then(Value::as_bool)
    }

    pub fn bool_or(&self, default: bool) -> bool {
        self.bool().unwrap_or(default)
    }

    /// A duration string (`"5s"`, `"250ms"`) or a number of seconds
    pub fn duration(&self) -> Option<Duration> {
        match self.value()? {
            Value::String(s) => parse_duration(s).ok(),
            Value::Number(n) => n
                .as_f64()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
            _ => None,
        }
    }

    pub fn duration_or(&self, default: Duration) -> Duration {
        self.duration().unwrap_or(default)
    }

    /// An array whose elements are all strings
    pub fn strings(&self) -> Option<Vec<String>> {
        self.value()?
            .as_array()?
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    pub fn strings_or(&self, default: Vec<String>) -> Vec<String> {
        self.strings().unwrap_or(default)
    }

    /// An object whose values are all strings
    pub fn string_map(&self) -> Option<HashMap<String, String>> {
        self.value()?
            .as_object()?
            .iter()
            .map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
            .collect()
    }

    pub fn string_map_or(&self, default: HashMap<String, String>) -> HashMap<String, String> {
        self.string_map().unwrap_or(default)
    }
}

/// Store backed by a JSON file
///
/// The file is read on first access and rewritten after every mutation. A
/// missing file reads as an empty object and is created on first write.
pub struct JsonConfigStore {
    path: PathBuf,
    data: Mutex<Option<Map<String, Value>>>,
}

impl JsonConfigStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            data: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn loaded(&self) -> Result<MutexGuard<'_, Option<Map<String, Value>>>, ConfigError> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| ConfigError::Io(std::io::Error::other("config store lock poisoned")))?;

        if data.is_none() {
            *data = Some(self.load()?);
        }
        Ok(data)
    }

    fn load(&self) -> Result<Map<String, Value>, ConfigError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, data: &Map<String, Value>) -> Result<(), ConfigError> {
        let bytes = serde_json::to_vec_pretty(data)?;
        std::fs::write(&self.path, bytes)?;
        tracing::debug!(path = %self.path.display(), "saved config store");
        Ok(())
    }
}

impl ConfigStore for JsonConfigStore {
    fn get(&self, path: &[&str]) -> ConfigValue {
        let data = match self.loaded() {
            Ok(data) => data,
            Err(e) => return ConfigValue::from_error(e),
        };
        let Some(root) = data.as_ref() else {
            return ConfigValue::new(Value::Null);
        };

        let Some((last, parents)) = path.split_last() else {
            return ConfigValue::new(Value::Object(root.clone()));
        };

        let mut current = root;
        for key in parents {
            match current.get(*key) {
                Some(Value::Object(next)) => current = next,
                Some(Value::Null) | None => return ConfigValue::new(Value::Null),
                Some(_) => return ConfigValue::from_error(ConfigError::CannotIndex),
            }
        }

        ConfigValue::new(current.get(*last).cloned().unwrap_or(Value::Null))
    }

    /// Intermediate objects are created as needed
    fn set(&self, value: Value, path: &[&str]) -> Result<(), ConfigError> {
        let (last, parents) = path.split_last().ok_or(ConfigError::CannotIndex)?;

        let mut data = self.loaded()?;
        let root = data.get_or_insert_with(Map::new);

        let mut current = &mut *root;
        for key in parents {
            let entry = current
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if entry.is_null() {
                *entry = Value::Object(Map::new());
            }
            current = entry.as_object_mut().ok_or(ConfigError::CannotIndex)?;
        }
        current.insert(last.to_string(), value);

        self.save(root)
    }

    fn delete(&self, path: &[&str]) -> Result<(), ConfigError> {
        let (last, parents) = path.split_last().ok_or(ConfigError::CannotIndex)?;

        let mut data = self.loaded()?;
        let root = data.get_or_insert_with(Map::new);

        let mut current = &mut *root;
        for key in parents {
            match current.get_mut(*key) {
                Some(Value::Object(next)) => current = next,
                Some(Value::Null) | None => return Ok(()),
                Some(_) => return Err(ConfigError::CannotIndex),
            }
        }
        current.remove(*last);

        self.save(root)
    }
}
