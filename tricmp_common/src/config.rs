use crate::{AppConfig, TricmpError};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "tricmp.toml";
const CACHE_DIR_NAME: &str = "tricmp_cache";

/// Configuration together with where it was (or would be) stored
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: PathBuf,
    pub exists: bool,
    pub portable: bool,
}

/// Load the configuration from the portable location (next to the executable)
/// when present or preferred, else from the per-user config directory.
/// A missing file yields defaults.
pub fn load_config(prefer_portable: bool) -> Result<LoadedConfig, TricmpError> {
    let (path, portable) = resolve_config_path(prefer_portable)?;
    let mut loaded = load_config_from(&path)?;
    loaded.portable = portable;
    loaded.config.portable_mode = portable;
    Ok(loaded)
}

/// Load the configuration from an explicit file
pub fn load_config_from(path: &Path) -> Result<LoadedConfig, TricmpError> {
    let exists = path.exists();
    let config = if exists {
        let data = fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&data).map_err(|e| TricmpError::Serialization(e.to_string()))?;
        validate_config(&config)?;
        config
    } else {
        AppConfig::default()
    };

    Ok(LoadedConfig {
        config,
        path: path.to_path_buf(),
        exists,
        portable: false,
    })
}

/// Load the configuration and write defaults if no file exists yet
pub fn ensure_config(prefer_portable: bool) -> Result<LoadedConfig, TricmpError> {
    let loaded = load_config(prefer_portable)?;
    if !loaded.exists {
        save_config(&loaded.path, &loaded.config)?;
    }
    Ok(loaded)
}

pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), TricmpError> {
    validate_config(config)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let data = toml::to_string_pretty(config)
        .map_err(|e| TricmpError::Serialization(e.to_string()))?;
    fs::write(path, data)?;
    Ok(())
}

/// Reject values the engine cannot work with
pub fn validate_config(config: &AppConfig) -> Result<(), TricmpError> {
    if config.binary_sample_size == 0 {
        return Err(TricmpError::Config(
            "binary_sample_size must be greater than zero".to_string(),
        ));
    }
    if config.line_filters_blank() {
        return Err(TricmpError::Config(
            "text.line_filters must not contain empty patterns".to_string(),
        ));
    }
    Ok(())
}

impl AppConfig {
    fn line_filters_blank(&self) -> bool {
        self.text.line_filters.iter().any(|f| f.trim().is_empty())
    }
}

pub fn default_cache_dir(portable: bool, config_path: &Path) -> Result<PathBuf, TricmpError> {
    if portable {
        let base = config_path
            .parent()
            .map(|path| path.to_path_buf())
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        return Ok(base.join(CACHE_DIR_NAME));
    }

    Ok(project_dirs()?.cache_dir().to_path_buf())
}

fn project_dirs() -> Result<ProjectDirs, TricmpError> {
    ProjectDirs::from("", "tricmp", "tricmp")
        .ok_or_else(|| TricmpError::Config("Unable to determine config directory".to_string()))
}

fn resolve_config_path(prefer_portable: bool) -> Result<(PathBuf, bool), TricmpError> {
    if let Some(portable_path) = portable_config_path() {
        if prefer_portable || portable_path.exists() {
            return Ok((portable_path, true));
        }
    }

    Ok((project_dirs()?.config_dir().join(CONFIG_FILE_NAME), false))
}

fn portable_config_path() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join(CONFIG_FILE_NAME)))
}
