//! Configuration – reads/writes `~/.sensorwatch/config.toml`.

use serde::{Deserialize, Serialize};
use sensorwatch_coverage::CoverageKind;
use sensorwatch_runtime::{EngineConfig, LogFormat};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted user configuration stored in `~/.sensorwatch/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Delay between simulated host frames.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Engine settings: coverage source, invariant policy, readiness
    /// timeout, rules.
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_frame_interval_ms() -> u64 {
    250
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval_ms(),
            log_format: LogFormat::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// Return the path to `~/.sensorwatch/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".sensorwatch").join("config.toml")
}

/// Load the config from disk and apply environment overrides.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    let mut cfg = load_from(&config_path())?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `SENSORWATCH_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SENSORWATCH_COVERAGE` | `engine.coverage_provider` (`none` or `scansat`) |
/// | `SENSORWATCH_FRAME_INTERVAL_MS` | `frame_interval_ms` |
/// | `SENSORWATCH_LOG_FORMAT` | `log_format` (`compact` or `json`) |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SENSORWATCH_COVERAGE") {
        match v.to_ascii_lowercase().as_str() {
            "none" => cfg.engine.coverage_provider = CoverageKind::None,
            "scansat" => cfg.engine.coverage_provider = CoverageKind::ScanSat,
            _ => {}
        }
    }
    if let Ok(v) = std::env::var("SENSORWATCH_FRAME_INTERVAL_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.frame_interval_ms = ms;
    }
    if let Some(format) = LogFormat::from_env() {
        cfg.log_format = format;
    }
}

/// Save the config to disk, creating `~/.sensorwatch/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
