pub mod replay;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use replay::ReplayBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

use std::path::Path;

use anyhow::Result;

use crate::config::DetectorSettings;
use crate::detect::backend::DetectorBackend;
use crate::error::ConfigError;

/// Opens the backend matching the model file: `.jsonl` replays, `.onnx` runs tract.
pub fn open_backend(model: &Path, settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    if !model.exists() {
        return Err(ConfigError::ModelNotFound(model.to_path_buf()).into());
    }
    let ext = model
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jsonl" => Ok(Box::new(ReplayBackend::open(model)?)),
        "onnx" => open_onnx(model, settings),
        _ => Err(ConfigError::UnsupportedExtension(format!(".{}", ext)).into()),
    }
}

#[cfg(feature = "backend-tract")]
fn open_onnx(model: &Path, settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let backend = TractBackend::new(model, settings.input)?
        .with_thresholds(settings.min_score, settings.iou_threshold);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn open_onnx(_model: &Path, _settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(ConfigError::FeatureDisabled {
        what: "ONNX detection",
        feature: "backend-tract",
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::config_error;

    #[test]
    fn missing_model_is_a_configuration_error() {
        let err = open_backend(Path::new("/nonexistent/model.onnx"), &DetectorSettings::default())
            .err()
            .expect("missing model");
        assert!(matches!(
            config_error(&err),
            Some(ConfigError::ModelNotFound(_))
        ));
    }

    #[test]
    fn unknown_model_format_is_rejected() -> Result<()> {
        let file = tempfile::Builder::new().suffix(".pt").tempfile()?;
        let err = open_backend(file.path(), &DetectorSettings::default())
            .err()
            .expect("unsupported model");
        assert_eq!(
            config_error(&err),
            Some(&ConfigError::UnsupportedExtension(".pt".into()))
        );
        Ok(())
    }
}
