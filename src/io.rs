//! YAML persistence of configuration and calibration results.
//!
//! Field names follow the serde derives of the records (snake_case). Floats are
//! written in shortest round-trip form, so a reloaded camera projects to exactly the
//! same pixels. Records with invariants are validated while loading.

use crate::calibration::FitResult;
use crate::config::PipelineConfig;
use crate::error::{PendulumCvError, PendulumCvResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use tracing::info;

pub fn to_yaml<T: Serialize>(value: &T) -> PendulumCvResult<String> {
    Ok(serde_yaml::to_string(value)?)
}

pub fn from_yaml<T: DeserializeOwned>(text: &str) -> PendulumCvResult<T> {
    Ok(serde_yaml::from_str(text)?)
}

/// Writes `value` to `path`, creating parent directories as needed.
pub fn save_yaml<T: Serialize, P: AsRef<Path>>(path: P, value: &T) -> PendulumCvResult<()> {
    let path = path.as_ref();
    let text = to_yaml(value)?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| io_error(path, e))?;
    }
    fs::write(path, text).map_err(|e| io_error(path, e))?;
    info!("Wrote {}", path.display());
    Ok(())
}

pub fn load_yaml<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> PendulumCvResult<T> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    from_yaml(&text).map_err(|e| match e {
        PendulumCvError::Serialization(msg) => {
            PendulumCvError::Serialization(format!("{}: {msg}", path.display()))
        }
        other => other,
    })
}

pub fn save_calibration<P: AsRef<Path>>(path: P, fit: &FitResult) -> PendulumCvResult<()> {
    save_yaml(path, fit)
}

pub fn load_calibration<P: AsRef<Path>>(path: P) -> PendulumCvResult<FitResult> {
    load_yaml(path)
}

pub fn save_config<P: AsRef<Path>>(path: P, config: &PipelineConfig) -> PendulumCvResult<()> {
    save_yaml(path, config)
}

/// Loads and validates a pipeline configuration.
pub fn load_config<P: AsRef<Path>>(path: P) -> PendulumCvResult<PipelineConfig> {
    let config: PipelineConfig = load_yaml(path)?;
    config.validate()?;
    Ok(config)
}

fn io_error(path: &Path, err: std::io::Error) -> PendulumCvError {
    PendulumCvError::Io(format!("{}: {err}", path.display()))
}
