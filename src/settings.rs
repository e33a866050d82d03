use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use regex::Regex;
use serde::Deserialize;

const ENV_PREFIX: &str = "MGSCRAPE";

/// How extracted records reach the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One existence check plus UPDATE or INSERT per record.
    Single,
    /// Buffered upserts, one transaction per batch.
    Batched,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sitemap_url: String,
    pub db_path: PathBuf,
    pub session_path: PathBuf,
    pub batch_size: usize,
    pub skip_existing: bool,
    pub mode: Mode,
    /// Only sitemap URLs matching this regex are crawled.
    pub include_pattern: Option<String>,
    pub browser: BrowserSettings,
    pub auth: AuthSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub timeout_secs: u64,
    pub user_agent: Option<String>,
    pub window_width: u32,
    pub window_height: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub login_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
    /// Element that only exists for a signed-in user, checked against the live
    /// site before use. Unset by default: leaving the login URL counts as
    /// success.
    pub success_selector: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sitemap_url: "https://www.mgeko.cc/sitemap.xml".into(),
            db_path: PathBuf::from("sitemap_urls.db"),
            session_path: PathBuf::from("mg_cookies.json"),
            batch_size: 50,
            skip_existing: true,
            mode: Mode::Batched,
            include_pattern: None,
            browser: BrowserSettings::default(),
            auth: AuthSettings::default(),
        }
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            timeout_secs: 30,
            user_agent: None,
            window_width: 1920,
            window_height: 1080,
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            login_url: "https://www.mgeko.cc/portal/api/login/".into(),
            username: None,
            password: None,
            username_selector: "input[name='user']".into(),
            password_selector: "input[name='pass']".into(),
            submit_selector: "button.login100-form-btn".into(),
            success_selector: None,
        }
    }
}

impl BrowserSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Settings {
    /// Defaults, then the optional config file, then `MGSCRAPE_*` variables
    /// (nested keys use `__`, e.g. `MGSCRAPE_AUTH__PASSWORD`).
    pub fn load(file: &Path) -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::from(file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {:?}", file))?
            .try_deserialize()
            .context("Invalid configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        self.include_regex()?;
        Ok(())
    }

    pub fn include_regex(&self) -> Result<Option<Regex>> {
        self.include_pattern
            .as_deref()
            .map(|p| Regex::new(p).with_context(|| format!("Bad include_pattern {:?}", p)))
            .transpose()
    }
}
