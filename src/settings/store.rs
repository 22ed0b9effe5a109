//! Key-value persistence for [`MirroringSettings`].
//!
//! Settings live as a flat JSON object under the `mirroring_settings`
//! namespace. Every update rewrites the whole record, so the last write wins.

use crate::assets::{MAX_FRAME_RATE, MIN_FRAME_RATE, SETTINGS_NAMESPACE};
use crate::config::app_name;
use crate::error::SettingsError;
use crate::settings::{Bitrate, MirroringSettings, Resolution};
use log::{debug, warn};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const KEY_RESOLUTION: &str = "resolution";
const KEY_FPS: &str = "fps";
const KEY_BITRATE: &str = "bitrate";
const KEY_PORT: &str = "port";
const KEY_AUDIO_ENABLED: &str = "audio_enabled";

pub const KEYS: [&str; 5] = [KEY_RESOLUTION, KEY_FPS, KEY_BITRATE, KEY_PORT, KEY_AUDIO_ENABLED];

pub struct SettingsStore {
    path: Option<PathBuf>,
    values: Mutex<Map<String, Value>>,
}

impl SettingsStore {
    /// A store that forgets everything on drop.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Mutex::new(Map::new()),
        }
    }

    /// Open (or lazily create) the store backed by `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let values = match tokio::fs::read(&path).await {
            Ok(raw) if raw.is_empty() => Map::new(),
            Ok(raw) => match serde_json::from_slice::<Value>(&raw)? {
                Value::Object(map) => map,
                other => {
                    warn!(
                        "Settings file {} holds {} instead of an object, starting fresh",
                        path.display(),
                        type_name(&other)
                    );
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("Loaded {} settings from {}", values.len(), path.display());

        Ok(Self {
            path: Some(path),
            values: Mutex::new(values),
        })
    }

    /// Open the store in the per-user configuration directory.
    pub async fn open_default() -> Result<Self, SettingsError> {
        Self::open(Self::default_path()?).await
    }

    pub fn default_path() -> Result<PathBuf, SettingsError> {
        let base = dirs::config_dir().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no configuration directory for this user",
            )
        })?;
        Ok(base
            .join(app_name())
            .join(format!("{}.json", SETTINGS_NAMESPACE)))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read the full record, falling back to defaults field by field.
    pub async fn load_settings(&self) -> MirroringSettings {
        let values = self.values.lock().await;
        let defaults = MirroringSettings::default();

        MirroringSettings {
            resolution: read_preset(&values, KEY_RESOLUTION).unwrap_or(defaults.resolution),
            fps: values
                .get(KEY_FPS)
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| (MIN_FRAME_RATE..=MAX_FRAME_RATE).contains(v))
                .unwrap_or(defaults.fps),
            bitrate: read_preset(&values, KEY_BITRATE).unwrap_or(defaults.bitrate),
            port: values
                .get(KEY_PORT)
                .and_then(Value::as_u64)
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(defaults.port),
            audio_enabled: values
                .get(KEY_AUDIO_ENABLED)
                .and_then(Value::as_bool)
                .unwrap_or(defaults.audio_enabled),
        }
    }

    pub async fn update_resolution(&self, resolution: Resolution) -> Result<(), SettingsError> {
        self.put(KEY_RESOLUTION, Value::from(resolution.as_str())).await
    }

    pub async fn update_fps(&self, fps: u32) -> Result<(), SettingsError> {
        if !(MIN_FRAME_RATE..=MAX_FRAME_RATE).contains(&fps) {
            return Err(SettingsError::OutOfRange {
                key: KEY_FPS,
                value: fps as i64,
                min: MIN_FRAME_RATE as i64,
                max: MAX_FRAME_RATE as i64,
            });
        }
        self.put(KEY_FPS, Value::from(fps)).await
    }

    pub async fn update_bitrate(&self, bitrate: Bitrate) -> Result<(), SettingsError> {
        self.put(KEY_BITRATE, Value::from(bitrate.as_str())).await
    }

    pub async fn update_port(&self, port: u16) -> Result<(), SettingsError> {
        self.put(KEY_PORT, Value::from(port)).await
    }

    pub async fn update_audio_enabled(&self, enabled: bool) -> Result<(), SettingsError> {
        self.put(KEY_AUDIO_ENABLED, Value::from(enabled)).await
    }

    /// Update one field from its textual form, as typed on a command line.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        let invalid = || SettingsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            KEY_RESOLUTION => self.update_resolution(value.parse().map_err(|_| invalid())?).await,
            KEY_FPS => self.update_fps(value.trim().parse().map_err(|_| invalid())?).await,
            KEY_BITRATE => self.update_bitrate(value.parse().map_err(|_| invalid())?).await,
            KEY_PORT => self.update_port(value.trim().parse().map_err(|_| invalid())?).await,
            KEY_AUDIO_ENABLED => {
                let enabled = match value.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" | "on" | "1" => true,
                    "false" | "no" | "off" | "0" => false,
                    _ => return Err(invalid()),
                };
                self.update_audio_enabled(enabled).await
            }
            other => Err(SettingsError::UnknownKey(other.to_string())),
        }
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        let mut values = self.values.lock().await;
        let mut updated = values.clone();
        updated.insert(key.to_string(), value);

        // memory only follows once the file holds the new record
        if let Some(path) = &self.path {
            persist(path, &updated).await?;
        }
        *values = updated;
        debug!("Setting {} updated", key);
        Ok(())
    }
}

async fn persist(path: &Path, values: &Map<String, Value>) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let raw = serde_json::to_vec_pretty(values)?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, raw).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn read_preset<T: std::str::FromStr>(values: &Map<String, Value>, key: &str) -> Option<T> {
    let raw = values.get(key)?.as_str()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring stored {} {:?}", key, raw);
            None
        }
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_store_reads_defaults() {
        let store = SettingsStore::in_memory();
        assert_eq!(store.load_settings().await, MirroringSettings::default());
    }

    #[tokio::test]
    async fn test_updates_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mirroring_settings.json");

        let store = SettingsStore::open(&path).await.unwrap();
        store.update_resolution(Resolution::Hd).await.unwrap();
        store.update_fps(60).await.unwrap();
        store.update_bitrate(Bitrate::Mbps10).await.unwrap();
        store.update_port(9000).await.unwrap();
        store.update_audio_enabled(false).await.unwrap();
        drop(store);

        let reopened = SettingsStore::open(&path).await.unwrap();
        let settings = reopened.load_settings().await;
        assert_eq!(settings.resolution, Resolution::Hd);
        assert_eq!(settings.fps, 60);
        assert_eq!(settings.bitrate, Bitrate::Mbps10);
        assert_eq!(settings.port, 9000);
        assert!(!settings.audio_enabled);

        let raw: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["resolution"], "1280x720");
        assert_eq!(raw["bitrate"], "10 Mbps");
        assert_eq!(raw["audio_enabled"], false);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let store = SettingsStore::in_memory();
        store.update_fps(20).await.unwrap();
        store.update_fps(45).await.unwrap();
        assert_eq!(store.load_settings().await.fps, 45);
    }

    #[tokio::test]
    async fn test_fps_out_of_range_is_rejected() {
        let store = SettingsStore::in_memory();
        assert!(matches!(
            store.update_fps(61).await,
            Err(SettingsError::OutOfRange { key: "fps", .. })
        ));
        assert!(store.update_fps(14).await.is_err());
        assert_eq!(store.load_settings().await.fps, 30);
    }

    #[tokio::test]
    async fn test_mistyped_values_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirroring_settings.json");
        std::fs::write(
            &path,
            r#"{"resolution":"1024x768","fps":"fast","bitrate":"5 Mbps (high)","port":70000,"audio_enabled":false}"#,
        )
        .unwrap();

        let store = SettingsStore::open(&path).await.unwrap();
        let settings = store.load_settings().await;
        assert_eq!(settings.resolution, Resolution::FullHd);
        assert_eq!(settings.fps, 30);
        assert_eq!(settings.bitrate, Bitrate::Mbps5);
        assert_eq!(settings.port, 8080);
        assert!(!settings.audio_enabled);
    }

    #[tokio::test]
    async fn test_set_from_text() {
        let store = SettingsStore::in_memory();
        store.set("resolution", "854x480 (SD)").await.unwrap();
        store.set("audio_enabled", "off").await.unwrap();
        store.set("port", "0").await.unwrap();

        let settings = store.load_settings().await;
        assert_eq!(settings.resolution, Resolution::Sd);
        assert!(!settings.audio_enabled);
        assert_eq!(settings.port, 0);

        assert!(matches!(
            store.set("volume", "3").await,
            Err(SettingsError::UnknownKey(_))
        ));
        assert!(matches!(
            store.set("bitrate", "fast").await,
            Err(SettingsError::InvalidValue { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"").unwrap();
        let path = blocker.join("mirroring_settings.json");

        let store = SettingsStore::open(&path).await.unwrap();
        assert!(matches!(
            store.update_fps(45).await,
            Err(SettingsError::Io(_))
        ));
        assert_eq!(store.load_settings().await.fps, 30);
    }

    #[tokio::test]
    async fn test_corrupted_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirroring_settings.json");
        std::fs::write(&path, b"{not json").unwrap();

        assert!(matches!(
            SettingsStore::open(&path).await,
            Err(SettingsError::Parse(_))
        ));
    }
}
