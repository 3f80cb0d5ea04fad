use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::Context;

pub const DEFAULT_CONFIG_FILE: &str = "tatva.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub preference_backend_url: String,
    pub identity_url: Option<String>,
    pub identity_anon_key: String,
    pub splash_duration_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            preference_backend_url: "http://127.0.0.1:8000".into(),
            identity_url: None,
            identity_anon_key: String::new(),
            splash_duration_ms: 3500,
        }
    }
}

impl Settings {
    pub fn splash_duration(&self) -> Duration {
        Duration::from_millis(self.splash_duration_ms)
    }
}

/// Defaults, then `path` if it exists, then environment variables.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        apply_file_overrides(&mut settings, &raw)
            .with_context(|| format!("invalid config file '{}'", path.display()))?;
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file_overrides(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg = toml::from_str::<HashMap<String, toml::Value>>(raw)?;

    if let Some(v) = file_cfg.get("preference_backend_url").and_then(|v| v.as_str()) {
        settings.preference_backend_url = v.to_string();
    }
    if let Some(v) = file_cfg.get("identity_url").and_then(|v| v.as_str()) {
        settings.identity_url = Some(v.to_string());
    }
    if let Some(v) = file_cfg.get("identity_anon_key").and_then(|v| v.as_str()) {
        settings.identity_anon_key = v.to_string();
    }
    if let Some(v) = file_cfg.get("splash_duration_ms") {
        settings.splash_duration_ms = match v {
            toml::Value::Integer(ms) => u64::try_from(*ms).context("splash_duration_ms must be positive")?,
            toml::Value::String(ms) => ms.parse().context("splash_duration_ms must be a number")?,
            _ => anyhow::bail!("splash_duration_ms must be a number"),
        };
    }

    Ok(())
}

fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("TATVA_PREFERENCE_BACKEND_URL") {
        settings.preference_backend_url = v;
    }
    if let Some(v) = lookup("APP__PREFERENCE_BACKEND_URL") {
        settings.preference_backend_url = v;
    }

    if let Some(v) = lookup("TATVA_IDENTITY_URL") {
        settings.identity_url = Some(v);
    }
    if let Some(v) = lookup("APP__IDENTITY_URL") {
        settings.identity_url = Some(v);
    }

    if let Some(v) = lookup("TATVA_IDENTITY_ANON_KEY") {
        settings.identity_anon_key = v;
    }
    if let Some(v) = lookup("APP__IDENTITY_ANON_KEY") {
        settings.identity_anon_key = v;
    }

    for key in ["TATVA_SPLASH_DURATION_MS", "APP__SPLASH_DURATION_MS"] {
        if let Some(parsed) = lookup(key).and_then(|v| v.parse::<u64>().ok()) {
            settings.splash_duration_ms = parsed;
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
