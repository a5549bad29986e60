//! Error taxonomy for the sensing pipeline.
//!
//! Every variant carries a stable code so log lines can be grepped and
//! callers holding an `anyhow::Error` can classify it with
//! `downcast_ref::<PipelineError>()`.

/// Classified pipeline failure.
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineError {
    /// The detector returned a label the size table has no width for.
    /// Indicates a mismatched detector/size-table pairing.
    UnmappedLabel { label: String },
    /// A configuration value failed validation.
    InvalidConfig { message: String },
    /// A detection with a zero-width bounding box reached the estimator.
    ZeroWidth { label: String },
    /// A single capture iteration failed; the next iteration retries.
    Capture { message: String },
    /// A write to the peer failed; the alert for this cycle is dropped.
    LinkWrite { message: String },
    /// Scan or connect did not produce a session.
    LinkConnect { message: String },
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::UnmappedLabel { .. } => "CONFIG_UNMAPPED_LABEL",
            PipelineError::InvalidConfig { .. } => "CONFIG_INVALID",
            PipelineError::ZeroWidth { .. } => "ESTIMATE_ZERO_WIDTH",
            PipelineError::Capture { .. } => "CAPTURE_FAILED",
            PipelineError::LinkWrite { .. } => "LINK_WRITE_FAILED",
            PipelineError::LinkConnect { .. } => "LINK_CONNECT_FAILED",
        }
    }

    /// Only unmapped labels indicate a deployment that cannot produce
    /// correct distances at all.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            PipelineError::UnmappedLabel { .. } | PipelineError::InvalidConfig { .. }
        )
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        PipelineError::InvalidConfig {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::UnmappedLabel { label } => {
                write!(f, "{}: no known width for label '{}'", self.code(), label)
            }
            PipelineError::InvalidConfig { message } => write!(f, "{}: {}", self.code(), message),
            PipelineError::ZeroWidth { label } => write!(
                f,
                "{}: zero-width bounding box for label '{}'",
                self.code(),
                label
            ),
            PipelineError::Capture { message }
            | PipelineError::LinkWrite { message }
            | PipelineError::LinkConnect { message } => write!(f, "{}: {}", self.code(), message),
        }
    }
}

impl std::error::Error for PipelineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code() {
        let err = PipelineError::UnmappedLabel {
            label: "bus".to_string(),
        };
        let text = err.to_string();
        assert!(text.starts_with("CONFIG_UNMAPPED_LABEL"));
        assert!(text.contains("bus"));
    }

    #[test]
    fn classifies_through_anyhow() {
        let err: anyhow::Error = PipelineError::LinkWrite {
            message: "not connected".to_string(),
        }
        .into();
        let classified = err.downcast_ref::<PipelineError>().unwrap();
        assert_eq!(classified.code(), "LINK_WRITE_FAILED");
        assert!(!classified.is_config());
    }
}
