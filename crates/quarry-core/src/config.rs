//! Configuration loading and merging for quarry.
//!
//! Configuration is resolved from multiple sources with
//! environment > project > home > defaults precedence. File configuration is
//! loaded from `.quarry.yaml`; environment variables use the `QUARRY_` prefix.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::CoreError;

/// File name looked up in the home and project directories.
pub const CONFIG_FILE_NAME: &str = ".quarry.yaml";

/// Prefix of environment variables read by [`apply_env`].
pub const ENV_PREFIX: &str = "QUARRY";

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Top-level quarry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarryConfig {
    /// Execution context passed to the engine with every statement.
    pub engine: EngineConfig,
    /// Tiered cache settings.
    pub cache: CacheConfig,
    /// Status polling settings.
    pub polling: PollingConfig,
    /// Whether to normalize SQL formatting before submission.
    pub normalize: bool,
    /// Whether to cancel executions when waiting is interrupted.
    pub kill_on_interrupt: bool,
}

impl Default for QuarryConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            cache: CacheConfig::default(),
            polling: PollingConfig::default(),
            normalize: true,
            kill_on_interrupt: true,
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Execution context settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default database. If omitted, the database must be named in SQL.
    pub database: Option<String>,
    /// Workgroup to run statements in.
    pub workgroup: Option<String>,
    /// Output location for results, e.g. `s3://bucket/prefix/`.
    pub output_location: Option<String>,
    /// Engine region.
    pub region: Option<String>,
}

// ---------------------------------------------------------------------------
// CacheConfig
// ---------------------------------------------------------------------------

/// Tiered cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch for both tiers.
    pub enabled: bool,
    /// Whether cached entries may be read.
    pub read: bool,
    /// Whether new entries may be written.
    pub write: bool,
    /// Whether cached executions that failed are replayed instead of
    /// re-submitted.
    pub cache_failures: bool,
    /// URI of the local tier (execution ids and results).
    pub local: Option<String>,
    /// URI of the remote tier (execution ids only).
    pub remote: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            read: true,
            write: true,
            cache_failures: false,
            local: None,
            remote: None,
        }
    }
}

// ---------------------------------------------------------------------------
// PollingConfig
// ---------------------------------------------------------------------------

/// Status polling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Upper bound of the delay between two status polls, in seconds.
    pub max_backoff_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_backoff_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Load and merge configuration from all sources.
///
/// Resolution order (highest priority first):
/// 1. `QUARRY_*` environment variables
/// 2. `.quarry.yaml` in the project directory
/// 3. `.quarry.yaml` in the user home directory
/// 4. Built-in defaults
///
/// # Errors
///
/// Returns [`CoreError::Config`] if a config file exists but is malformed, or
/// an environment variable holds an invalid value.
pub fn load_config(project_dir: Option<&Path>) -> Result<QuarryConfig, CoreError> {
    load_config_from(home_dir().as_deref(), project_dir, |name| {
        std::env::var(name).ok()
    })
}

/// Same as [`load_config`] with an explicit home directory and environment.
pub fn load_config_from(
    home: Option<&Path>,
    project_dir: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<QuarryConfig, CoreError> {
    let mut config = QuarryConfig::default();

    // Layer 1: Home directory config.
    if let Some(home) = home {
        let home_config = home.join(CONFIG_FILE_NAME);
        if home_config.is_file() {
            debug!(path = %home_config.display(), "loading home config");
            let layer = load_config_file(&home_config)?;
            config = merge_config(config, layer);
        }
    }

    // Layer 2: Project directory config.
    if let Some(dir) = project_dir {
        let project_config = dir.join(CONFIG_FILE_NAME);
        if project_config.is_file() {
            debug!(path = %project_config.display(), "loading project config");
            let layer = load_config_file(&project_config)?;
            config = merge_config(config, layer);
        }
    }

    // Layer 3: Environment.
    let config = apply_env(config, env)?;

    info!("configuration loaded");
    Ok(config)
}

/// Load a single config file as a layer.
fn load_config_file(path: &Path) -> Result<ConfigLayer, CoreError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CoreError::Config(format!(
            "failed to read config file '{}': {e}",
            path.display()
        ))
    })?;

    serde_yml::from_str(&content).map_err(|e| {
        CoreError::Config(format!(
            "failed to parse config file '{}': {e}",
            path.display()
        ))
    })
}

// ---------------------------------------------------------------------------
// Config layers
// ---------------------------------------------------------------------------

/// One config file as written: every setting the file leaves out is `None`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigLayer {
    engine: EngineConfig,
    cache: CacheLayer,
    polling: PollingLayer,
    normalize: Option<bool>,
    kill_on_interrupt: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CacheLayer {
    enabled: Option<bool>,
    read: Option<bool>,
    write: Option<bool>,
    cache_failures: Option<bool>,
    local: Option<String>,
    remote: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PollingLayer {
    max_backoff_secs: Option<u64>,
}

/// Merge `layer` on top of `base`. Settings the layer leaves out keep the
/// value from `base`.
fn merge_config(base: QuarryConfig, layer: ConfigLayer) -> QuarryConfig {
    QuarryConfig {
        engine: merge_engine(base.engine, layer.engine),
        cache: merge_cache(base.cache, layer.cache),
        polling: PollingConfig {
            max_backoff_secs: layer
                .polling
                .max_backoff_secs
                .unwrap_or(base.polling.max_backoff_secs),
        },
        normalize: layer.normalize.unwrap_or(base.normalize),
        kill_on_interrupt: layer.kill_on_interrupt.unwrap_or(base.kill_on_interrupt),
    }
}

fn merge_engine(base: EngineConfig, overlay: EngineConfig) -> EngineConfig {
    EngineConfig {
        database: overlay.database.or(base.database),
        workgroup: overlay.workgroup.or(base.workgroup),
        output_location: overlay.output_location.or(base.output_location),
        region: overlay.region.or(base.region),
    }
}

fn merge_cache(base: CacheConfig, layer: CacheLayer) -> CacheConfig {
    CacheConfig {
        enabled: layer.enabled.unwrap_or(base.enabled),
        read: layer.read.unwrap_or(base.read),
        write: layer.write.unwrap_or(base.write),
        cache_failures: layer.cache_failures.unwrap_or(base.cache_failures),
        local: layer.local.or(base.local),
        remote: layer.remote.or(base.remote),
    }
}

/// Apply `QUARRY_*` environment variables on top of `config`.
///
/// Empty values are ignored.
///
/// # Errors
///
/// Returns [`CoreError::Config`] for an unparsable boolean or number.
pub fn apply_env(
    mut config: QuarryConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<QuarryConfig, CoreError> {
    let get = |key: &str| {
        env(&format!("{ENV_PREFIX}_{key}")).filter(|v| !v.is_empty())
    };

    if let Some(v) = get("DATABASE") {
        config.engine.database = Some(v);
    }
    if let Some(v) = get("WORKGROUP") {
        config.engine.workgroup = Some(v);
    }
    if let Some(v) = get("OUTPUT_LOCATION") {
        config.engine.output_location = Some(v);
    }
    if let Some(v) = get("REGION") {
        config.engine.region = Some(v);
    }
    if let Some(v) = get("CACHE_LOCAL") {
        config.cache.local = Some(v);
    }
    if let Some(v) = get("CACHE_REMOTE") {
        config.cache.remote = Some(v);
    }
    if let Some(v) = get("NORMALIZE") {
        config.normalize = parse_bool("NORMALIZE", &v)?;
    }
    if let Some(v) = get("KILL_ON_INTERRUPT") {
        config.kill_on_interrupt = parse_bool("KILL_ON_INTERRUPT", &v)?;
    }
    if let Some(v) = get("MAX_BACKOFF_SECS") {
        config.polling.max_backoff_secs = v.trim().parse().map_err(|_| {
            CoreError::Config(format!(
                "{ENV_PREFIX}_MAX_BACKOFF_SECS: invalid number: {v}"
            ))
        })?;
    }

    Ok(config)
}

/// Parses a boolean environment value.
fn parse_bool(key: &str, value: &str) -> Result<bool, CoreError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => Err(CoreError::Config(format!(
            "{ENV_PREFIX}_{key}: invalid boolean value: {other}"
        ))),
    }
}

/// Get the user home directory.
pub fn home_dir() -> Option<PathBuf> {
    // HOME on macOS/Linux, USERPROFILE on Windows.
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
