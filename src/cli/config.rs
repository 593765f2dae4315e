use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub scraper: ScraperSettings,
    pub ai: AiSettings,
    pub cache: CacheSettings,
    pub pool: PoolSettings,
    pub storage: StorageSettings,
    /// Adds an error column to batch outputs.
    pub debug: bool,
}

/// HTTP fetching settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScraperSettings {
    pub fetch_timeout_secs: u64,
    pub user_agent: String,
}

/// AI assistant settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AiSettings {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key. The key itself
    /// never lives in a config file.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

/// Contact cache settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheSettings {
    pub redis_url: String,
    pub ttl_seconds: u64,
}

/// Worker pool settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoolSettings {
    /// Batch jobs running concurrently, process-wide.
    pub max_workers: usize,
    /// Rows scraped in parallel within one batch job.
    pub csv_workers: usize,
}

/// Batch file storage settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageSettings {
    pub blob_root: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        let blob_root = if let Some(proj_dirs) =
            directories::ProjectDirs::from("com", "contact-harvester", "contact-harvester")
        {
            proj_dirs.data_dir().join("jobs")
        } else {
            PathBuf::from("./data/jobs")
        };

        Self {
            scraper: ScraperSettings {
                fetch_timeout_secs: 10,
                user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string(),
            },
            ai: AiSettings {
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
                timeout_secs: 20,
            },
            cache: CacheSettings {
                redis_url: "redis://localhost:6379".to_string(),
                ttl_seconds: 86400,
            },
            pool: PoolSettings {
                max_workers: 2,
                csv_workers: 10,
            },
            storage: StorageSettings { blob_root },
            debug: false,
        }
    }
}

impl AppConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        let mut path = if let Some(proj_dirs) =
            directories::ProjectDirs::from("com", "contact-harvester", "contact-harvester")
        {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        };

        // Create the profiles directory if it doesn't exist
        path.push("profiles");
        if !path.exists() {
            if let Err(e) = fs::create_dir_all(&path) {
                error!("Failed to create config directory: {}", e);
            }
        }

        // Move back up to the config directory
        path.pop();
        path
    }

    /// Load the default configuration
    pub fn load_default() -> Result<Self> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("default.yaml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            // Create and save the default configuration
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            config.save_as_default()?;
            Ok(config)
        }
    }

    /// Load a configuration profile
    pub fn load_profile(profile: &str) -> Result<Self> {
        let config_dir = Self::config_dir();
        let profile_path = config_dir.join("profiles").join(format!("{}.yaml", profile));

        if profile_path.exists() {
            Self::load_from_file(&profile_path)
        } else {
            anyhow::bail!("Profile '{}' not found", profile)
        }
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        Ok(config)
    }

    /// Save the configuration as the default
    pub fn save_as_default(&self) -> Result<()> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("default.yaml");

        self.save_to_file(&config_path)
    }

    /// Save the configuration as a profile
    pub fn save_as_profile(&self, profile: &str) -> Result<()> {
        let config_dir = Self::config_dir();
        let profiles_dir = config_dir.join("profiles");

        if !profiles_dir.exists() {
            fs::create_dir_all(&profiles_dir).context(format!(
                "Failed to create profiles directory: {}",
                profiles_dir.display()
            ))?;
        }

        let profile_path = profiles_dir.join(format!("{}.yaml", profile));
        self.save_to_file(&profile_path)
    }

    /// Save the configuration to a file
    fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents =
            serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// List all available profiles
    pub fn list_profiles() -> Result<Vec<String>> {
        let config_dir = Self::config_dir();
        let profiles_dir = config_dir.join("profiles");

        if !profiles_dir.exists() {
            return Ok(vec![]);
        }

        let mut profiles = Vec::new();

        for entry in fs::read_dir(profiles_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_file() && path.extension().map_or(false, |ext| ext == "yaml") {
                if let Some(stem) = path.file_stem() {
                    if let Some(name) = stem.to_str() {
                        profiles.push(name.to_string());
                    }
                }
            }
        }

        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.scraper.fetch_timeout_secs, 10);
        assert_eq!(config.ai.timeout_secs, 20);
        assert_eq!(config.cache.ttl_seconds, 86400);
        assert_eq!(config.pool.max_workers, 2);
        assert_eq!(config.pool.csv_workers, 10);
        assert!(!config.debug);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = AppConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: AppConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.cache.redis_url, config.cache.redis_url);
        assert_eq!(parsed.ai.model, config.ai.model);
    }
}
