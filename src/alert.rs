//! Proximity alert levels and their one-byte wire encoding.

use anyhow::anyhow;
use std::str::FromStr;

use crate::config::AlertThresholds;

/// Proximity alert. Ordered by severity: `None < Green < Yellow < Red`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AlertLevel {
    None,
    Green,
    Yellow,
    Red,
}

impl AlertLevel {
    /// Byte written to the LED controller.
    pub fn as_byte(self) -> u8 {
        match self {
            AlertLevel::None => 0,
            AlertLevel::Red => 1,
            AlertLevel::Yellow => 2,
            AlertLevel::Green => 3,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(AlertLevel::None),
            1 => Some(AlertLevel::Red),
            2 => Some(AlertLevel::Yellow),
            3 => Some(AlertLevel::Green),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::None => "none",
            AlertLevel::Green => "green",
            AlertLevel::Yellow => "yellow",
            AlertLevel::Red => "red",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts level names (`red`) or wire bytes (`1`).
impl FromStr for AlertLevel {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_ascii_lowercase();
        if let Ok(byte) = value.parse::<u8>() {
            return AlertLevel::from_byte(byte)
                .ok_or_else(|| anyhow!("alert byte must be 0-3, got {}", byte));
        }
        match value.as_str() {
            "none" => Ok(AlertLevel::None),
            "green" => Ok(AlertLevel::Green),
            "yellow" => Ok(AlertLevel::Yellow),
            "red" => Ok(AlertLevel::Red),
            other => Err(anyhow!("unknown alert level '{}'", other)),
        }
    }
}

/// Classifies a summarized distance. No hysteresis: a distance hovering at a
/// boundary may flip between adjacent levels on successive windows.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AlertMapper {
    thresholds: AlertThresholds,
}

impl AlertMapper {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self { thresholds }
    }

    pub fn level(&self, distance_m: f64) -> AlertLevel {
        if distance_m < self.thresholds.red_below_m {
            AlertLevel::Red
        } else if distance_m < self.thresholds.yellow_below_m {
            AlertLevel::Yellow
        } else {
            AlertLevel::Green
        }
    }
}

impl Default for AlertMapper {
    fn default() -> Self {
        Self::new(AlertThresholds::default())
    }
}
