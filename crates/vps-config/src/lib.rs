mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable that overrides `developer_token` from the file, so
/// the token does not have to live on disk.
pub const TOKEN_ENV_VAR: &str = "VPS_DEVELOPER_TOKEN";

/// Returns the config directory: <platform config dir>/vps-anchor/
pub fn config_dir() -> Result<PathBuf> {
    let dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
        .join("vps-anchor");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Returns the config file path: <platform config dir>/vps-anchor/config.toml
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Load config from the default location, falling back to defaults when the
/// file does not exist.
pub fn load_config() -> Result<AppConfig> {
    load_config_from(&config_path()?)
}

/// Load config from `path`, apply environment overrides and validate.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        info!(?path, "Loaded config");
        config
    } else {
        info!(?path, "No config found, using defaults");
        AppConfig::default()
    };

    if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
        if !token.is_empty() {
            info!(var = TOKEN_ENV_VAR, "Developer token taken from environment");
            config.developer_token = token;
        }
    }

    validate(&config)?;
    Ok(config)
}

/// Save config to the default location.
pub fn save_config(config: &AppConfig) -> Result<()> {
    let path = config_path()?;
    let contents = toml::to_string_pretty(config)?;
    std::fs::write(&path, contents)?;
    info!(?path, "Saved config");
    Ok(())
}

/// Reject settings the session cannot run with; warn about ones that only
/// limit what it can do.
pub fn validate(config: &AppConfig) -> Result<()> {
    if config.localization_interval_ms == 0 {
        bail!("localization_interval_ms must be greater than zero");
    }
    let s = &config.stabilizer;
    if !(s.smoothing > 0.0 && s.smoothing < 1.0) {
        bail!("stabilizer.smoothing must be in (0, 1), got {}", s.smoothing);
    }
    if !(s.warp_distance > 0.0) {
        bail!("stabilizer.warp_distance must be positive, got {}", s.warp_distance);
    }
    if !(0.0..=180.0).contains(&s.warp_angle_degrees) {
        bail!(
            "stabilizer.warp_angle_degrees must be within [0, 180], got {}",
            s.warp_angle_degrees
        );
    }
    if !(s.max_scale_deviation >= 0.0) {
        bail!("stabilizer.max_scale_deviation must not be negative");
    }

    if config.map_ids.is_empty() {
        warn!("No map ids configured; localization requests will not match any map");
    }
    Ok(())
}
