use anyhow::anyhow;
use serde::Deserialize;
use std::str::FromStr;

use super::distance::DistanceSample;

/// Which samples of a full window survive outlier rejection.
///
/// `LiteralOr` keeps `d <= mean - sd || d <= mean + sd`. The first clause is
/// implied by the second, so this only drops samples above `mean + sd`; it is
/// the behavior deployed units have always had. `SymmetricBand` keeps
/// `mean - sd <= d <= mean + sd` and also drops low outliers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierFilter {
    #[default]
    LiteralOr,
    SymmetricBand,
}

impl OutlierFilter {
    pub fn retains(self, value: f64, mean: f64, std_dev: f64) -> bool {
        match self {
            OutlierFilter::LiteralOr => value <= mean - std_dev || value <= mean + std_dev,
            OutlierFilter::SymmetricBand => mean - std_dev <= value && value <= mean + std_dev,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutlierFilter::LiteralOr => "literal_or",
            OutlierFilter::SymmetricBand => "symmetric_band",
        }
    }
}

impl FromStr for OutlierFilter {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "literal_or" | "literal" => Ok(OutlierFilter::LiteralOr),
            "symmetric_band" | "symmetric" => Ok(OutlierFilter::SymmetricBand),
            other => Err(anyhow!(
                "unknown outlier filter '{}' (expected literal_or or symmetric_band)",
                other
            )),
        }
    }
}

/// Result of summarizing one full window.
#[derive(Clone, Debug, PartialEq)]
pub struct WindowSummary {
    /// Mean of the retained samples: the value that drives the alert.
    pub distance_m: f64,
    pub mean_m: f64,
    /// Population standard deviation of the whole window.
    pub std_dev_m: f64,
    pub retained: usize,
    pub total: usize,
    /// Frames that contributed the no-object sentinel.
    pub no_object_frames: usize,
    /// True when no sample survived the filter and the full-window mean was used.
    pub used_fallback: bool,
}

/// Summarize a window: mean, population standard deviation, outlier
/// rejection, then the mean of what is left.
///
/// An empty retained subset falls back to the full-window mean. An empty
/// window yields `None`.
pub fn summarize(samples: &[DistanceSample], filter: OutlierFilter) -> Option<WindowSummary> {
    if samples.is_empty() {
        return None;
    }
    let total = samples.len();
    let n = total as f64;
    let mean = samples.iter().map(|s| s.meters).sum::<f64>() / n;
    let variance = samples
        .iter()
        .map(|s| {
            let delta = s.meters - mean;
            delta * delta
        })
        .sum::<f64>()
        / n;
    let std_dev = variance.sqrt();

    let retained: Vec<f64> = samples
        .iter()
        .map(|s| s.meters)
        .filter(|&d| filter.retains(d, mean, std_dev))
        .collect();
    let used_fallback = retained.is_empty();
    let distance_m = if used_fallback {
        mean
    } else {
        retained.iter().sum::<f64>() / retained.len() as f64
    };

    Some(WindowSummary {
        distance_m,
        mean_m: mean,
        std_dev_m: std_dev,
        retained: retained.len(),
        total,
        no_object_frames: samples.iter().filter(|s| s.is_sentinel()).count(),
        used_fallback,
    })
}

/// Collects exactly `size` samples, then summarizes and starts over.
#[derive(Clone, Debug)]
pub struct WindowAggregator {
    size: usize,
    filter: OutlierFilter,
    samples: Vec<DistanceSample>,
}

impl WindowAggregator {
    /// `size` is clamped to at least one sample.
    pub fn new(size: usize, filter: OutlierFilter) -> Self {
        let size = size.max(1);
        Self {
            size,
            filter,
            samples: Vec::with_capacity(size),
        }
    }

    /// Add a frame's sample. Returns the summary when this sample completes
    /// the window; the window is then empty again.
    pub fn push(&mut self, sample: DistanceSample) -> Option<WindowSummary> {
        self.samples.push(sample);
        if self.samples.len() < self.size {
            return None;
        }
        let summary = summarize(&self.samples, self.filter);
        self.samples.clear();
        summary
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn filter(&self) -> OutlierFilter {
        self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detected(values: &[f64]) -> Vec<DistanceSample> {
        values.iter().map(|&v| DistanceSample::detected(v)).collect()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn identical_window_summarizes_to_its_value() {
        let mut window = WindowAggregator::new(10, OutlierFilter::LiteralOr);
        let mut result = None;
        for _ in 0..10 {
            result = window.push(DistanceSample::detected(37.5));
        }
        let summary = result.unwrap();
        assert!(close(summary.distance_m, 37.5));
        assert_eq!(summary.retained, 10);
        assert_eq!(summary.std_dev_m, 0.0);
        assert!(!summary.used_fallback);
    }

    #[test]
    fn summary_only_on_the_nth_sample() {
        let mut window = WindowAggregator::new(3, OutlierFilter::LiteralOr);
        assert!(window.push(DistanceSample::detected(1.0)).is_none());
        assert!(window.push(DistanceSample::detected(2.0)).is_none());
        assert_eq!(window.len(), 2);
        assert!(window.push(DistanceSample::detected(3.0)).is_some());
        assert!(window.is_empty());
        assert!(window.push(DistanceSample::detected(4.0)).is_none());
    }

    #[test]
    fn single_high_outlier_is_excluded() {
        // mean 127, population sd 291: 1000 lies above mean + sd.
        let mut values = vec![30.0; 9];
        values.push(1000.0);
        let summary = summarize(&detected(&values), OutlierFilter::LiteralOr).unwrap();
        assert!(close(summary.mean_m, 127.0));
        assert!(close(summary.std_dev_m, 291.0));
        assert_eq!(summary.retained, 9);
        assert!(close(summary.distance_m, 30.0));
    }

    #[test]
    fn literal_filter_keeps_low_outliers() {
        // mean 90.1, sd ~29.7: the 1.0 sample lies below mean - sd.
        let mut values = vec![100.0; 9];
        values.push(1.0);
        let samples = detected(&values);

        let literal = summarize(&samples, OutlierFilter::LiteralOr).unwrap();
        assert_eq!(literal.retained, 10);
        assert!(close(literal.distance_m, 90.1));

        let symmetric = summarize(&samples, OutlierFilter::SymmetricBand).unwrap();
        assert_eq!(symmetric.retained, 9);
        assert!(close(symmetric.distance_m, 100.0));
    }

    #[test]
    fn sentinel_frames_are_counted_and_filtered_like_any_sample() {
        let mut samples = detected(&[20.0; 8]);
        samples.push(DistanceSample::no_object());
        samples.push(DistanceSample::no_object());
        let summary = summarize(&samples, OutlierFilter::LiteralOr).unwrap();
        assert_eq!(summary.no_object_frames, 2);
        // mean 416, sd 792: both sentinels lie above mean + sd.
        assert_eq!(summary.retained, 8);
        assert!(close(summary.distance_m, 20.0));
    }

    #[test]
    fn all_sentinel_window_stays_far() {
        let samples = vec![DistanceSample::no_object(); 10];
        let summary = summarize(&samples, OutlierFilter::SymmetricBand).unwrap();
        assert_eq!(summary.no_object_frames, 10);
        assert!(close(summary.distance_m, 2000.0));
    }

    #[test]
    fn retains_predicates_match_their_definitions() {
        let (mean, sd) = (50.0, 10.0);
        assert!(OutlierFilter::LiteralOr.retains(10.0, mean, sd));
        assert!(OutlierFilter::LiteralOr.retains(60.0, mean, sd));
        assert!(!OutlierFilter::LiteralOr.retains(60.5, mean, sd));
        assert!(!OutlierFilter::SymmetricBand.retains(39.9, mean, sd));
        assert!(OutlierFilter::SymmetricBand.retains(40.0, mean, sd));
        assert!(!OutlierFilter::SymmetricBand.retains(60.1, mean, sd));
    }

    #[test]
    fn empty_retained_subset_falls_back_to_mean() {
        // The sum overflows, mean - sd is NaN and the band admits nothing.
        let samples = detected(&[f64::MAX, f64::MAX]);
        let summary = summarize(&samples, OutlierFilter::SymmetricBand).unwrap();
        assert!(summary.used_fallback);
        assert_eq!(summary.retained, 0);
        assert_eq!(summary.distance_m, summary.mean_m);
    }

    #[test]
    fn empty_window_has_no_summary() {
        assert!(summarize(&[], OutlierFilter::LiteralOr).is_none());
    }

    #[test]
    fn parses_filter_names() {
        assert_eq!(
            "symmetric".parse::<OutlierFilter>().unwrap(),
            OutlierFilter::SymmetricBand
        );
        assert_eq!(
            "LITERAL_OR".parse::<OutlierFilter>().unwrap(),
            OutlierFilter::LiteralOr
        );
        assert!("median".parse::<OutlierFilter>().is_err());
    }
}
