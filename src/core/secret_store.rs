use super::errors::CoreError;

const KEYRING_SERVICE: &str = "com.jobmatcher.desktop.gemini.api_key";
const KEYRING_USERNAME: &str = "default";

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Environment,
    Keychain,
}

/// Gemini API key held in the OS keychain.
pub struct ApiKeyStore;

impl ApiKeyStore {
    pub fn new() -> Self {
        Self
    }

    pub fn load(&self) -> anyhow::Result<Option<String>> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)?;
        let value = match entry.get_password() {
            Ok(v) => v,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        Ok(non_blank(Some(value)))
    }

    pub fn save(&self, api_key: &str) -> anyhow::Result<()> {
        let trimmed = api_key.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidRequest("API key must not be empty".to_string()).into());
        }

        let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)?;
        entry.set_password(trimmed)?;
        Ok(())
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)?;
        match entry.delete_credential() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// `GEMINI_API_KEY` wins over the keychain. A keychain that cannot be
    /// opened counts as empty.
    pub fn resolve(&self) -> Result<(String, KeySource), CoreError> {
        pick_api_key(std::env::var(API_KEY_ENV).ok(), || {
            self.load().unwrap_or_else(|err| {
                tracing::debug!("keychain lookup failed: {err}");
                None
            })
        })
    }
}

impl Default for ApiKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

fn pick_api_key(
    env_value: Option<String>,
    keychain: impl FnOnce() -> Option<String>,
) -> Result<(String, KeySource), CoreError> {
    if let Some(key) = non_blank(env_value) {
        return Ok((key, KeySource::Environment));
    }
    non_blank(keychain())
        .map(|key| (key, KeySource::Keychain))
        .ok_or(CoreError::MissingApiKey)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_key_wins_and_keychain_is_not_consulted() {
        let resolved = pick_api_key(Some(" env-key ".to_string()), || {
            panic!("keychain should not be read")
        })
        .unwrap();
        assert_eq!(resolved, ("env-key".to_string(), KeySource::Environment));
    }

    #[test]
    fn blank_environment_falls_back_to_keychain() {
        let resolved = pick_api_key(Some("  ".to_string()), || Some("stored".to_string())).unwrap();
        assert_eq!(resolved, ("stored".to_string(), KeySource::Keychain));
    }

    #[test]
    fn no_key_anywhere_is_missing_api_key() {
        assert!(matches!(
            pick_api_key(None, || None),
            Err(CoreError::MissingApiKey)
        ));
    }
}
