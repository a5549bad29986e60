use anyhow::{anyhow, Result};

use crate::config::{DetectorSettings, ProximityConfig, SizeTable};

mod backend;
mod backends;
mod labels;
mod result;

pub use backend::DetectorBackend;
pub use backends::ScriptedBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use labels::LabelMap;
pub use result::{BoundingBox, Detection};

/// Build the detector named in the configuration.
///
/// `scripted` replays an approaching-vehicle sequence sized to the camera
/// frame; `tract` loads an ONNX model and its label map.
pub fn build_detector(config: &ProximityConfig) -> Result<Box<dyn DetectorBackend>> {
    let settings = &config.detector;
    match settings.backend.as_str() {
        "scripted" => Ok(Box::new(ScriptedBackend::approaching_vehicle(
            config.camera.width,
            config.camera.height,
        ))),
        "tract" => build_tract(settings, &config.estimation.size_table),
        other => Err(anyhow!("unknown detector backend '{}'", other)),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &DetectorSettings, sizes: &SizeTable) -> Result<Box<dyn DetectorBackend>> {
    let model_path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract detector requires detector.model_path"))?;
    let labels_path = settings
        .labels_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract detector requires detector.labels_path"))?;
    let labels = LabelMap::load(labels_path)?;
    let unmapped = labels.unmapped(sizes);
    if !unmapped.is_empty() {
        log::error!(
            "label map {} has labels without a known width: {}; frames detecting them will be rejected",
            labels_path.display(),
            unmapped.join(", ")
        );
    }
    Ok(Box::new(TractBackend::new(
        model_path,
        labels,
        settings.input_width,
        settings.input_height,
    )?))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_settings: &DetectorSettings, _sizes: &SizeTable) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!("tract detector requires the backend-tract feature"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FocalLength;

    #[test]
    fn scripted_detector_is_the_default() {
        let config = ProximityConfig::with_focal_length(FocalLength::new(800.0).unwrap());
        let detector = build_detector(&config).unwrap();
        assert_eq!(detector.name(), "scripted");
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let mut config = ProximityConfig::with_focal_length(FocalLength::new(800.0).unwrap());
        config.detector.backend = "yolo".to_string();
        assert!(build_detector(&config).is_err());
    }
}
