use crate::config::{EstimationSettings, FocalLength, SizeTable};
use crate::detect::Detection;
use crate::error::PipelineError;

/// Distance recorded for a frame in which no detection cleared the
/// confidence threshold. Far beyond any distance the camera can resolve, so
/// it never wins a nearest-object reduction.
pub const NO_OBJECT_DISTANCE_M: f64 = 2000.0;

/// Representative distance for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistanceSample {
    pub meters: f64,
    /// False when `meters` is the no-object sentinel.
    pub detected: bool,
}

impl DistanceSample {
    pub fn detected(meters: f64) -> Self {
        Self {
            meters,
            detected: true,
        }
    }

    pub fn no_object() -> Self {
        Self {
            meters: NO_OBJECT_DISTANCE_M,
            detected: false,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        !self.detected
    }
}

/// Pinhole-camera distance: `real_width * focal_length / box_width`.
#[derive(Clone, Copy, Debug)]
pub struct DistanceEstimator<'a> {
    focal_length: FocalLength,
    sizes: &'a SizeTable,
}

impl<'a> DistanceEstimator<'a> {
    pub fn new(focal_length: FocalLength, sizes: &'a SizeTable) -> Self {
        Self {
            focal_length,
            sizes,
        }
    }

    /// Distance in meters to an object of class `label` whose box is
    /// `bbox_width_px` wide.
    ///
    /// Unknown labels fail with `UnmappedLabel`; widths that are zero,
    /// negative or NaN fail with `ZeroWidth` so no infinity or NaN reaches
    /// the window.
    pub fn estimate(&self, bbox_width_px: f64, label: &str) -> Result<f64, PipelineError> {
        let real_width = self.sizes.width_of(label)?;
        if !(bbox_width_px > 0.0) {
            return Err(PipelineError::ZeroWidth {
                label: label.to_string(),
            });
        }
        Ok(real_width * self.focal_length.value() / bbox_width_px)
    }
}

/// Reduces all detections of a frame to the nearest object's distance.
#[derive(Clone, Copy, Debug)]
pub struct FrameDistanceReducer<'a> {
    estimator: DistanceEstimator<'a>,
    confidence_threshold: f32,
}

impl<'a> FrameDistanceReducer<'a> {
    pub fn new(estimator: DistanceEstimator<'a>, confidence_threshold: f32) -> Self {
        Self {
            estimator,
            confidence_threshold,
        }
    }

    pub fn from_settings(settings: &'a EstimationSettings) -> Self {
        Self::new(
            DistanceEstimator::new(settings.focal_length, &settings.size_table),
            settings.confidence_threshold,
        )
    }

    pub fn estimator(&self) -> &DistanceEstimator<'a> {
        &self.estimator
    }

    /// Nearest distance among detections scoring in `(threshold, 1]`, or the
    /// no-object sentinel.
    ///
    /// A zero-width box is skipped with a warning. An unmapped label aborts
    /// the whole frame.
    pub fn reduce(&self, detections: &[Detection]) -> Result<DistanceSample, PipelineError> {
        let mut nearest: Option<f64> = None;
        for detection in detections
            .iter()
            .filter(|d| d.confidence > self.confidence_threshold && d.confidence <= 1.0)
        {
            match self
                .estimator
                .estimate(detection.bbox.width(), &detection.label)
            {
                Ok(meters) => {
                    nearest = Some(nearest.map_or(meters, |current| current.min(meters)));
                }
                Err(err @ PipelineError::ZeroWidth { .. }) => {
                    log::warn!("skipping detection: {}", err);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(nearest
            .map(DistanceSample::detected)
            .unwrap_or_else(DistanceSample::no_object))
    }
}
