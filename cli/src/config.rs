use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

pub struct Config {
    pub db_path: PathBuf,
    /// Document tree hosted by `pacer serve`.
    pub remote_db_path: PathBuf,
    pub data_dir: PathBuf,
}

/// Where the remote document store lives and who we are in it.
#[derive(Debug, Clone, Default)]
pub struct RemoteSettings {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub user_id: Option<String>,
}

impl RemoteSettings {
    /// Sync is only attempted with both a server and a user.
    pub fn is_configured(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.url) && present(&self.user_id)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "pacer").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        Ok(Config {
            db_path: data_dir.join("pacer.db"),
            remote_db_path: data_dir.join("remote.db"),
            data_dir,
        })
    }

    /// Load the server API key from disk, or generate a new one.
    ///
    /// Returns `(key, newly_created)`.
    pub fn load_or_create_api_key(&self) -> Result<(String, bool)> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("api_key");

        if path.exists() {
            let key = std::fs::read_to_string(&path).context("Failed to read API key file")?;
            let key = key.trim().to_string();
            if !key.is_empty() {
                return Ok((key, false));
            }
        }

        let bytes: [u8; 32] = rand::rng().random();
        let key = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &key).context("Failed to write API key file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set API key file permissions")?;
        }
        eprintln!("Generated new API key: {key}");
        eprintln!("Clients use it with: pacer --remote-url <url> --api-key {key}");
        Ok((key, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &std::path::Path) -> Config {
        Config {
            db_path: dir.join("pacer.db"),
            remote_db_path: dir.join("remote.db"),
            data_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn test_api_key_is_generated_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let (key, created) = config.load_or_create_api_key().unwrap();
        assert!(created);
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));

        let (again, created) = config.load_or_create_api_key().unwrap();
        assert!(!created);
        assert_eq!(again, key);
    }

    #[test]
    fn test_remote_settings_configured() {
        let mut settings = RemoteSettings::default();
        assert!(!settings.is_configured());
        settings.url = Some("http://localhost:8080".to_string());
        assert!(!settings.is_configured());
        settings.user_id = Some("  ".to_string());
        assert!(!settings.is_configured());
        settings.user_id = Some("u1".to_string());
        assert!(settings.is_configured());
    }
}
