use crate::error::AppError;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const SERVICE_NAME: &str = "wayfarer";

const ENV_PREFIX: &str = "WAYFARER";

pub fn normalize_provider_name(provider: &str) -> String {
    provider.trim().to_ascii_lowercase()
}

fn app_home_dir() -> Result<PathBuf, AppError> {
    if let Ok(custom) = std::env::var("WAYFARER_HOME") {
        return Ok(PathBuf::from(custom));
    }

    if let Some(dirs) = ProjectDirs::from("com", "wayfarer", SERVICE_NAME) {
        let candidate = dirs.data_local_dir().to_path_buf();
        if fs::create_dir_all(&candidate).is_ok() {
            return Ok(candidate);
        }
    }

    let cwd = std::env::current_dir()?;
    Ok(cwd.join(".wayfarer"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: String,
    pub completion: CompletionSettings,
    pub limits: RateLimits,
    pub content: ContentSettings,
}

/// Chat-completions endpoint and model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionSettings {
    pub provider: String,
    pub base_url: String,
    pub model: String,
}

/// Ceilings tracked by the rate guard. Only the per-minute window rejects
/// requests unless `enforce_daily` is set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimits {
    pub requests_per_minute: usize,
    pub requests_per_day: u64,
    pub tokens_per_day: u64,
    pub enforce_daily: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ContentSettings {
    /// Firestore project that holds the highlights/destinations/stories collections.
    pub project_id: Option<String>,
    /// Overrides the Firestore REST root, mostly useful for emulators.
    pub base_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".into(),
            completion: CompletionSettings::default(),
            limits: RateLimits::default(),
            content: ContentSettings::default(),
        }
    }
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            provider: "groq".into(),
            base_url: "https://api.groq.com/openai/v1".into(),
            model: "llama-3.3-70b-versatile".into(),
        }
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            requests_per_minute: 30,
            requests_per_day: 1000,
            tokens_per_day: 100_000,
            enforce_daily: false,
        }
    }
}

pub fn config_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("config"))
}

pub fn data_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("data"))
}

pub fn config_path() -> Result<PathBuf, AppError> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn db_path() -> Result<PathBuf, AppError> {
    Ok(data_dir()?.join("usage.sqlite"))
}

pub fn ensure_dirs() -> Result<(), AppError> {
    fs::create_dir_all(config_dir()?)?;
    fs::create_dir_all(data_dir()?)?;
    Ok(())
}

fn normalize_config(config: &mut AppConfig) {
    config.completion.provider = normalize_provider_name(&config.completion.provider);

    let trimmed = config.completion.base_url.trim_end_matches('/');
    if trimmed.len() != config.completion.base_url.len() {
        config.completion.base_url = trimmed.to_string();
    }

    if let Some(base) = config.content.base_url.as_mut() {
        while base.ends_with('/') {
            base.pop();
        }
    }
}

fn validate_config(config: &AppConfig) -> Result<(), AppError> {
    url::Url::parse(&config.completion.base_url)?;
    if config.completion.model.trim().is_empty() {
        return Err(AppError::Config("completion.model must not be empty".into()));
    }
    if config.limits.requests_per_minute == 0 {
        return Err(AppError::Config(
            "limits.requests_per_minute must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Layers built-in defaults, the TOML file at `path` (if present) and
/// `WAYFARER__SECTION__KEY` environment overrides.
pub fn load_config_from(path: &Path) -> Result<AppConfig, AppError> {
    let settings = ::config::Config::builder()
        .add_source(::config::Config::try_from(&AppConfig::default())?)
        .add_source(::config::File::from(path).required(false))
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let mut parsed: AppConfig = settings.try_deserialize()?;
    normalize_config(&mut parsed);
    validate_config(&parsed)?;
    Ok(parsed)
}

pub fn load_config() -> Result<AppConfig, AppError> {
    load_config_from(&config_path()?)
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    ensure_dirs()?;
    let path = config_path()?;
    let raw = toml::to_string_pretty(config)?;
    fs::write(path, raw)?;
    Ok(())
}

fn key_entry(provider: &str) -> Result<keyring::Entry, AppError> {
    let normalized = normalize_provider_name(provider);
    Ok(keyring::Entry::new(
        SERVICE_NAME,
        &format!("provider:{normalized}"),
    )?)
}

pub fn set_api_key(provider: &str, key: &str) -> Result<(), AppError> {
    key_entry(provider)?.set_password(key)?;
    Ok(())
}

pub fn get_api_key(provider: &str) -> Result<String, AppError> {
    let normalized = normalize_provider_name(provider);
    if let Ok(value) = key_entry(&normalized)?.get_password() {
        if !value.is_empty() {
            return Ok(value);
        }
    }

    let env_name = format!(
        "{}_API_KEY",
        normalized.to_ascii_uppercase().replace('-', "_")
    );
    if let Ok(value) = std::env::var(env_name) {
        if !value.is_empty() {
            return Ok(value);
        }
    }

    Err(AppError::Config(format!(
        "No API key found for provider '{normalized}'. Run `wayfarer set-key` or set the env var."
    )))
}

pub fn ensure_initialized() -> Result<(), AppError> {
    ensure_dirs()?;
    let cfg_path = config_path()?;
    if !Path::new(&cfg_path).exists() {
        save_config(&AppConfig::default())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn normalize_provider_name_trims_and_lowercases() {
        assert_eq!(normalize_provider_name(" Groq "), "groq");
        assert_eq!(normalize_provider_name("OpenAI"), "openai");
    }

    #[test]
    fn normalize_config_strips_trailing_slashes() {
        let mut cfg = AppConfig::default();
        cfg.completion.provider = " GROQ ".into();
        cfg.completion.base_url = "https://api.groq.com/openai/v1/".into();
        cfg.content.base_url = Some("http://localhost:8080//".into());

        normalize_config(&mut cfg);
        assert_eq!(cfg.completion.provider, "groq");
        assert_eq!(cfg.completion.base_url, "https://api.groq.com/openai/v1");
        assert_eq!(cfg.content.base_url.as_deref(), Some("http://localhost:8080"));
    }

    #[test]
    fn load_config_from_missing_file_uses_defaults() {
        let tmp = TempDir::new().expect("tempdir");
        let cfg = load_config_from(&tmp.path().join("config.toml")).expect("load defaults");
        assert_eq!(cfg.limits, RateLimits::default());
        assert_eq!(cfg.completion.model, "llama-3.3-70b-versatile");
        assert!(!cfg.limits.enforce_daily);
        assert!(cfg.content.project_id.is_none());
    }

    #[test]
    fn load_config_from_merges_partial_file_over_defaults() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("config.toml");
        fs::write(
            &path,
            "[limits]\nrequests_per_minute = 5\n\n[content]\nproject_id = \"travel-blog\"\n",
        )
        .expect("write config");

        let cfg = load_config_from(&path).expect("load config");
        assert_eq!(cfg.limits.requests_per_minute, 5);
        assert_eq!(cfg.limits.requests_per_day, 1000);
        assert_eq!(cfg.content.project_id.as_deref(), Some("travel-blog"));
    }

    #[test]
    fn load_config_from_rejects_zero_per_minute_ceiling() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[limits]\nrequests_per_minute = 0\n").expect("write config");

        let err = load_config_from(&path).expect_err("expected validation error");
        assert!(err.to_string().contains("requests_per_minute"));
    }

    #[test]
    fn saved_default_config_round_trips_through_loader() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("config.toml");
        fs::write(
            &path,
            toml::to_string_pretty(&AppConfig::default()).expect("serialize"),
        )
        .expect("write config");

        let cfg = load_config_from(&path).expect("load config");
        assert_eq!(cfg.completion.base_url, "https://api.groq.com/openai/v1");
        assert_eq!(cfg.limits, RateLimits::default());
    }

    #[test]
    fn sampling_parameters_are_not_configurable() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("config.toml");
        fs::write(
            &path,
            "[completion]\ntemperature = 1.5\nmax_tokens = 64\n\n[limits]\nenforce_daily = true\n",
        )
        .expect("write config");

        let cfg = load_config_from(&path).expect("load config");
        let saved = toml::to_string_pretty(&cfg).expect("serialize");
        assert!(!saved.contains("temperature"));
        assert!(!saved.contains("max_tokens"));
        assert!(cfg.limits.enforce_daily);
    }
}
