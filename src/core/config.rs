use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::Deserialize;
use std::collections::HashMap;
use std::{fs, path::Path, path::PathBuf};
use tracing::{debug, info};

const CONFIG_FILE: &str = "database.yaml";

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    #[serde(alias = "postgresql")]
    Postgres,
    Sqlite,
}

/// Credentials and location of the store for one account.
///
/// For `sqlite` only `database` is used, as the path of the database file.
/// A section without `type` is a postgres account.
#[derive(Deserialize, Clone, PartialEq)]
pub struct ConnectionDescriptor {
    #[serde(rename = "type", default)]
    pub kind: StoreKind,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
}

impl std::fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// Database config file: one section per account name.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(transparent)]
pub struct DatabaseConfig {
    pub accounts: HashMap<String, ConnectionDescriptor>,
}

impl DatabaseConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default database config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// `config/database.yaml` under the working directory, or the user config
    /// directory when the working directory has none.
    pub fn default_config_path() -> Result<PathBuf> {
        let cwd = std::env::current_dir().context("Could not determine working directory")?;
        let local = cwd.join("config").join(CONFIG_FILE);
        if local.exists() {
            return Ok(local);
        }

        let proj_dirs = ProjectDirs::from("com", "bpi", "bpi-scraper")
            .context("Could not determine project directories")?;
        let user = proj_dirs.config_dir().join(CONFIG_FILE);
        if user.exists() {
            return Ok(user);
        }
        Ok(local)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Reading database config from {}", path.as_ref().display());
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!(accounts = config.accounts.len(), "Successfully loaded config");
        Ok(config)
    }

    pub fn account(&self, name: &str) -> Result<ConnectionDescriptor> {
        self.accounts
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("Account '{name}' not found in database config"))
    }
}

/// Resolves `account` from the file at `path`, or from the default location.
pub fn load_account(path: Option<&Path>, account: &str) -> Result<ConnectionDescriptor> {
    let config = match path {
        Some(path) => DatabaseConfig::load_from_path(path)?,
        None => DatabaseConfig::load()?,
    };
    let descriptor = config.account(account)?;
    info!(account, ?descriptor, "Resolved connection descriptor");
    Ok(descriptor)
}
