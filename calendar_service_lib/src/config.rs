use anyhow::{Error, format_err};
use serde::Deserialize;
use stack_string::StackString;
use std::{ops::Deref, path::Path, sync::Arc, time::Duration};

use gcal_lib::{
    gcal_instance::GCAL_API_URL,
    oauth::{GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL, GOOGLE_USERINFO_URL, GoogleEndpoints, GoogleOAuth},
};

#[derive(Default, Debug, Deserialize)]
pub struct ConfigInner {
    #[serde(default = "default_db_host")]
    pub db_host: StackString,
    #[serde(default)]
    pub db_name: StackString,
    #[serde(default)]
    pub db_user: StackString,
    #[serde(default = "default_db_port")]
    pub db_port: u16,
    #[serde(default)]
    pub db_password: StackString,
    /// Takes precedence over the `db_*` settings when present.
    pub database_url: Option<StackString>,
    #[serde(alias = "your_client_id")]
    pub google_client_id: StackString,
    #[serde(alias = "your_client_secret")]
    pub google_client_secret: StackString,
    pub redirect_url: StackString,
    #[serde(default = "default_host")]
    pub host: StackString,
    #[serde(default = "default_port")]
    pub port: u32,
    #[serde(default = "default_calendar_ui_url")]
    pub calendar_ui_url: StackString,
    #[serde(default = "default_calendar_id")]
    pub calendar_id: StackString,
    #[serde(default = "default_session_ttl_seconds")]
    pub session_ttl_seconds: u64,
    #[serde(default)]
    pub validate_oauth_state: bool,
    #[serde(default)]
    pub strict_timestamps: bool,
    #[serde(default = "default_gcal_timeout_seconds")]
    pub gcal_timeout_seconds: u64,
    #[serde(default = "default_google_auth_url")]
    pub google_auth_url: StackString,
    #[serde(default = "default_google_token_url")]
    pub google_token_url: StackString,
    #[serde(default = "default_google_userinfo_url")]
    pub google_userinfo_url: StackString,
    #[serde(default = "default_gcal_api_url")]
    pub gcal_api_url: StackString,
}

#[derive(Default, Debug, Clone)]
pub struct Config(Arc<ConfigInner>);

fn default_db_host() -> StackString {
    "localhost".into()
}
fn default_db_port() -> u16 {
    5432
}
fn default_host() -> StackString {
    "0.0.0.0".into()
}
fn default_port() -> u32 {
    8000
}
fn default_calendar_ui_url() -> StackString {
    "https://calendar.google.com".into()
}
fn default_calendar_id() -> StackString {
    "primary".into()
}
fn default_session_ttl_seconds() -> u64 {
    24 * 3600
}
fn default_gcal_timeout_seconds() -> u64 {
    30
}
fn default_google_auth_url() -> StackString {
    GOOGLE_AUTH_URL.into()
}
fn default_google_token_url() -> StackString {
    GOOGLE_TOKEN_URL.into()
}
fn default_google_userinfo_url() -> StackString {
    GOOGLE_USERINFO_URL.into()
}
fn default_gcal_api_url() -> StackString {
    GCAL_API_URL.into()
}

impl ConfigInner {
    /// Deserialize from `(NAME, value)` pairs, names matched case-insensitively.
    pub fn from_vars<I>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter(vars).map_err(Into::into)
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_config() -> Result<Self, Error> {
        let config_dir = dirs::config_dir().ok_or_else(|| format_err!("No CONFIG directory"))?;
        let default_fname = config_dir.join("calendar_service_rust").join("config.env");

        dotenvy::dotenv().ok();

        for env_file in [Path::new("config.env"), default_fname.as_path()] {
            if env_file.exists() {
                dotenvy::from_path(env_file).ok();
            }
        }

        let conf: ConfigInner = envy::from_env()?;

        Ok(Self(Arc::new(conf)))
    }

    /// Connection string for the database, either `DATABASE_URL` or a
    /// key/value string assembled from the `DB_*` settings.
    pub fn database_url(&self) -> StackString {
        if let Some(database_url) = &self.database_url {
            return database_url.clone();
        }
        let mut database_url = format!("host={} port={}", self.db_host, self.db_port);
        for (key, value) in [
            ("user", &self.db_user),
            ("dbname", &self.db_name),
            ("password", &self.db_password),
        ] {
            if !value.is_empty() {
                database_url.push_str(&format!(" {key}={value}"));
            }
        }
        database_url.into()
    }

    pub fn google_endpoints(&self) -> Result<GoogleEndpoints, Error> {
        GoogleEndpoints::new(
            &self.google_auth_url,
            &self.google_token_url,
            &self.google_userinfo_url,
        )
    }

    pub fn google_oauth(&self) -> Result<GoogleOAuth, Error> {
        GoogleOAuth::new(
            &self.google_client_id,
            &self.google_client_secret,
            &self.redirect_url,
            self.google_endpoints()?,
            Duration::from_secs(self.gcal_timeout_seconds),
        )
    }
}

impl From<ConfigInner> for Config {
    fn from(inner: ConfigInner) -> Self {
        Self(Arc::new(inner))
    }
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Error;

    use crate::config::{Config, ConfigInner};

    fn vars(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_config_from_vars() -> Result<(), Error> {
        let inner = ConfigInner::from_vars(vars(&[
            ("DB_HOST", "db.local"),
            ("DB_NAME", "calendar"),
            ("DB_USER", "cal"),
            ("DB_PORT", "6543"),
            ("DB_PASSWORD", "hunter2"),
            ("YOUR_CLIENT_ID", "client-id"),
            ("YOUR_CLIENT_SECRET", "client-secret"),
            ("REDIRECT_URL", "http://localhost:8000/google/redirect"),
        ]))?;
        assert_eq!(inner.google_client_id.as_str(), "client-id");
        assert_eq!(inner.google_client_secret.as_str(), "client-secret");
        assert_eq!(inner.port, 8000);
        assert_eq!(inner.calendar_id.as_str(), "primary");
        assert_eq!(inner.calendar_ui_url.as_str(), "https://calendar.google.com");
        assert!(!inner.validate_oauth_state);
        assert!(!inner.strict_timestamps);

        let config: Config = inner.into();
        assert_eq!(
            config.database_url().as_str(),
            "host=db.local port=6543 user=cal dbname=calendar password=hunter2"
        );
        config.google_oauth()?;
        Ok(())
    }

    #[test]
    fn test_config_missing_client_id() {
        let result = ConfigInner::from_vars(vars(&[("REDIRECT_URL", "http://localhost")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_database_url_override() -> Result<(), Error> {
        let inner = ConfigInner::from_vars(vars(&[
            ("GOOGLE_CLIENT_ID", "id"),
            ("GOOGLE_CLIENT_SECRET", "secret"),
            ("REDIRECT_URL", "http://localhost"),
            ("DATABASE_URL", "postgresql://user:pw@host:5432/db"),
            ("STRICT_TIMESTAMPS", "true"),
        ]))?;
        assert!(inner.strict_timestamps);
        let config: Config = inner.into();
        assert_eq!(
            config.database_url().as_str(),
            "postgresql://user:pw@host:5432/db"
        );
        Ok(())
    }
}
