use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::Value;
use tracing::debug;

use super::models::RuntimeSettings;

pub struct SettingsStore {
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self {
            file_path: app_data_root().join("settings.json"),
        }
    }

    pub fn new_with_path(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Missing file means defaults. Values are sanitized on the way in so a
    /// hand-edited file cannot configure zero workers.
    pub async fn load(&self) -> anyhow::Result<RuntimeSettings> {
        if !tokio::fs::try_exists(&self.file_path)
            .await
            .unwrap_or(false)
        {
            debug!(path = %self.file_path.display(), "no settings file, using defaults");
            return Ok(RuntimeSettings::default());
        }

        let content = tokio::fs::read_to_string(&self.file_path)
            .await
            .with_context(|| {
                format!("failed to read settings file {}", self.file_path.display())
            })?;

        let parsed = serde_json::from_str::<RuntimeSettings>(&content).with_context(|| {
            format!("invalid JSON in settings file {}", self.file_path.display())
        })?;

        Ok(parsed.sanitized())
    }

    pub async fn save(&self, settings: &RuntimeSettings) -> anyhow::Result<RuntimeSettings> {
        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let sanitized = settings.clone().sanitized();
        let json = serde_json::to_string_pretty(&sanitized)?;
        tokio::fs::write(&self.file_path, json)
            .await
            .with_context(|| format!("failed to write {}", self.file_path.display()))?;
        Ok(sanitized)
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Sets one field by its JSON key (`maxRetries`, `textModel`, ...). Text
/// fields take the value verbatim; other fields parse it as JSON.
pub fn update_setting(
    settings: &RuntimeSettings,
    key: &str,
    value: &str,
) -> anyhow::Result<RuntimeSettings> {
    let Value::Object(mut object) = serde_json::to_value(settings)? else {
        anyhow::bail!("settings did not serialize to an object");
    };

    let parsed = match object.get(key) {
        None => {
            let known: Vec<&str> = object.keys().map(String::as_str).collect();
            anyhow::bail!("unknown setting `{key}` (known: {})", known.join(", "));
        }
        Some(Value::String(_)) => Value::String(value.to_string()),
        Some(_) => serde_json::from_str(value)
            .with_context(|| format!("`{key}` expects a number, got `{value}`"))?,
    };
    object.insert(key.to_string(), parsed);

    serde_json::from_value(Value::Object(object))
        .with_context(|| format!("invalid value for `{key}`: {value}"))
}

pub fn app_data_root() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(local_app_data) = std::env::var("LOCALAPPDATA") {
            return PathBuf::from(local_app_data).join("JobMatcher");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = dirs::home_dir() {
            return home
                .join("Library")
                .join("Application Support")
                .join("JobMatcher");
        }
    }

    if let Some(path) = dirs::data_local_dir() {
        return path.join("JobMatcher");
    }

    PathBuf::from(".").join("JobMatcher")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ScorerBackend;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let store = SettingsStore::new_with_path(temp.path().join("settings.json"));

        assert_eq!(store.load().await.unwrap(), RuntimeSettings::default());
    }

    #[tokio::test]
    async fn save_sanitizes_and_load_reads_back() {
        let temp = tempfile::tempdir().unwrap();
        let store = SettingsStore::new_with_path(temp.path().join("nested").join("settings.json"));

        let saved = store
            .save(&RuntimeSettings {
                text_model: "gemini-2.0-flash".to_string(),
                scorer: ScorerBackend::Keyword,
                max_concurrent_requests: 0,
                ..RuntimeSettings::default()
            })
            .await
            .unwrap();
        assert_eq!(saved.max_concurrent_requests, 1);

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(loaded.text_model, "gemini-2.0-flash");
        assert_eq!(loaded.scorer, ScorerBackend::Keyword);
    }

    #[test]
    fn update_setting_parses_by_field_type() {
        let defaults = RuntimeSettings::default();

        let updated = update_setting(&defaults, "maxRetries", "5").unwrap();
        assert_eq!(updated.max_retries, 5);

        let updated = update_setting(&updated, "scorer", "keyword").unwrap();
        assert_eq!(updated.scorer, ScorerBackend::Keyword);
        assert_eq!(updated.max_retries, 5);

        let updated = update_setting(&defaults, "visionModel", "gemini-2.0-flash").unwrap();
        assert_eq!(updated.vision_model, "gemini-2.0-flash");
    }

    #[test]
    fn update_setting_rejects_unknown_keys_and_bad_values() {
        let defaults = RuntimeSettings::default();

        let err = update_setting(&defaults, "tesseractPath", "/usr/bin").unwrap_err();
        assert!(err.to_string().contains("unknown setting"));

        assert!(update_setting(&defaults, "maxRetries", "many").is_err());
        assert!(update_setting(&defaults, "scorer", "magic").is_err());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("settings.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let err = SettingsStore::new_with_path(&path).load().await.unwrap_err();
        assert!(err.to_string().contains("invalid JSON"));
    }
}
