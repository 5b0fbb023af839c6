use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    pub backend: BackendConfig,
    pub output: OutputConfig,
}

/// What to do when a site serves a bot-verification page instead of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengePolicy {
    /// Ask the operator to solve it in the visible browser, then resume.
    Pause,
    /// Stop dispatching work and report the remainder as failed.
    Abort,
}

/// Scraper configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub timeout_secs: u64,

    /// Fixed per-worker pause after each detail request.
    pub request_delay_ms: u64,

    /// Pause after listing navigation so client-side rendering settles.
    pub listing_delay_ms: u64,

    pub jitter_ms: u64,

    /// Wait after a browser-rendered detail page loads, before reading it.
    pub render_wait_ms: u64,

    pub listing_retries: usize,

    pub user_agent: String,

    pub workers: usize,

    pub headless: bool,

    pub challenge_policy: ChallengePolicy,
}

/// Hosted table backend (PostgREST-style)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: Option<String>,

    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    pub batch_size: usize,

    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            request_delay_ms: 1500,
            listing_delay_ms: 2500,
            jitter_ms: 0,
            render_wait_ms: 1500,
            listing_retries: 2,
            user_agent: default_user_agent(),
            workers: 3,
            headless: true,
            challenge_policy: ChallengePolicy::Abort,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            batch_size: 50,
            timeout_secs: 30,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { dir: PathBuf::from("data") }
    }
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36"
        .to_string()
}

impl ScraperConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn listing_delay(&self) -> Duration {
        Duration::from_millis(self.listing_delay_ms)
    }

    pub fn render_wait(&self) -> Duration {
        Duration::from_millis(self.render_wait_ms)
    }
}

impl BackendConfig {
    /// Base URL and key, or `None` when uploads are not configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.url.as_deref(), self.api_key.as_deref()) {
            (Some(url), Some(key)) if !url.is_empty() && !key.is_empty() => Some((url, key)),
            _ => None,
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from files + environment overrides
    pub fn load(extra: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            );

        if let Some(path) = extra {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let cfg = builder
            .add_source(
                config::Environment::with_prefix("HARVESTER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .context("Failed to assemble configuration")?;

        let mut app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration")?;

        app_cfg.backend.apply_env_fallbacks(|key| std::env::var(key).ok());
        Ok(app_cfg)
    }
}

impl BackendConfig {
    /// The upload scripts historically read the frontend's env names.
    fn apply_env_fallbacks(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.url.is_none() {
            self.url = ["SUPABASE_URL", "VITE_SUPABASE_URL"]
                .iter()
                .find_map(|k| lookup(k));
        }
        if self.api_key.is_none() {
            self.api_key = [
                "SUPABASE_SERVICE_ROLE_KEY",
                "VITE_SUPABASE_SERVICE_ROLE_KEY",
                "SUPABASE_ANON_KEY",
                "VITE_SUPABASE_ANON_KEY",
            ]
            .iter()
            .find_map(|k| lookup(k));
        }
        if let Some(url) = self.url.as_mut() {
            *url = url.trim_end_matches('/').to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn backend_without_key_is_not_configured() {
        let cfg = BackendConfig {
            url: Some("https://db.example.org".into()),
            ..Default::default()
        };
        assert!(cfg.credentials().is_none());
    }

    #[test]
    fn env_fallbacks_prefer_service_role_key() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("VITE_SUPABASE_URL", "https://db.example.org/"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("SUPABASE_SERVICE_ROLE_KEY", "service"),
        ]);
        let mut cfg = BackendConfig::default();
        cfg.apply_env_fallbacks(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.credentials(), Some(("https://db.example.org", "service")));
    }

    #[test]
    fn explicit_values_win_over_env() {
        let mut cfg = BackendConfig {
            url: Some("https://configured.example.org".into()),
            api_key: Some("configured".into()),
            ..Default::default()
        };
        cfg.apply_env_fallbacks(|_| Some("env".to_string()));
        assert_eq!(cfg.credentials(), Some(("https://configured.example.org", "configured")));
    }
}
