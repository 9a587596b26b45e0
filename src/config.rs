#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_MOOSIC_PORT: u16 = 8000;
pub const DEFAULT_MOOSIC_HOST: &str = "0.0.0.0";
pub const DEFAULT_CREDENTIALS_PATH: &str = "oauth.json";
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";
pub const DEFAULT_METADATA_TIMEOUT_SECS: u64 = 30;

/// Process-wide settings, resolved once at start-up and handed to whatever
/// needs them.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub host: String,
    pub port: u16,
    pub credentials_path: PathBuf,
    pub ytdlp_bin: PathBuf,
    pub metadata_timeout: Duration,
}

pub fn load_runtime_settings() -> Result<RuntimeSettings> {
    resolve_runtime_settings(RuntimeOverrides::default())
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub credentials_path: Option<PathBuf>,
    pub ytdlp_bin: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

/// Command-line overrides win over the process environment, which wins over
/// the `.env` file, which wins over the built-in defaults.
pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_runtime_settings_with_overrides(
        &file_vars,
        env_var_string,
        overrides,
    ))
}

#[cfg(test)]
fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> RuntimeSettings {
    build_runtime_settings_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimeSettings {
    let host = non_blank(overrides.host)
        .or_else(|| lookup_value("MOOSIC_HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_MOOSIC_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| {
            lookup_value("MOOSIC_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_MOOSIC_PORT);
    let credentials_path = overrides
        .credentials_path
        .or_else(|| lookup_value("MOOSIC_CREDENTIALS", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIALS_PATH));
    let ytdlp_bin = overrides
        .ytdlp_bin
        .or_else(|| lookup_value("MOOSIC_YTDLP_BIN", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_BIN));
    let metadata_timeout_secs = lookup_value("MOOSIC_METADATA_TIMEOUT_SECS", file_vars, &env_lookup)
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_METADATA_TIMEOUT_SECS);

    RuntimeSettings {
        host,
        port,
        credentials_path,
        ytdlp_bin,
        metadata_timeout: Duration::from_secs(metadata_timeout_secs),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_var_string(key: &str) -> Option<String> {
    non_blank(env::var(key).ok())
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

/// Parses `KEY=value` lines, tolerating `export` prefixes, comments and
/// single or double quotes. A missing file is treated as empty.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
