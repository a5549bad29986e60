use super::LinkHandle;
use crate::alert::AlertLevel;
use crate::error::PipelineError;

/// Writes alert levels to the controller's characteristic.
#[derive(Clone, Debug)]
pub struct AlertTransmitter {
    characteristic: String,
}

impl AlertTransmitter {
    pub fn new(characteristic: impl Into<String>) -> Self {
        Self {
            characteristic: characteristic.into(),
        }
    }

    pub fn characteristic(&self) -> &str {
        &self.characteristic
    }

    /// Single write of `level`'s byte. Returns the byte written.
    pub fn send(&self, level: AlertLevel, handle: Option<&mut LinkHandle>) -> Result<u8, PipelineError> {
        let byte = level.as_byte();
        let handle = handle.ok_or_else(|| PipelineError::LinkWrite {
            message: "no session with the controller".to_string(),
        })?;
        if !handle.is_connected() {
            return Err(PipelineError::LinkWrite {
                message: format!("session with {} is disconnected", handle.address()),
            });
        }
        handle.write(&self.characteristic, &[byte])?;
        Ok(byte)
    }

    /// Best-effort [`send`](Self::send). A failure is logged, the alert is
    /// dropped for this cycle and the session is released, so the next
    /// health check reconnects whether the peer went away or rejected the
    /// write.
    pub fn dispatch(&self, level: AlertLevel, handle: &mut Option<LinkHandle>) -> Option<u8> {
        match self.send(level, handle.as_mut()) {
            Ok(byte) => {
                log::debug!("sent {} (byte {})", level, byte);
                Some(byte)
            }
            Err(e) => {
                log::warn!("dropping {} alert: {}", level, e);
                if let Some(lost) = handle.take() {
                    log::warn!("releasing session with {}", lost.address());
                }
                None
            }
        }
    }
}
