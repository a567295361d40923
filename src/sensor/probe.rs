//! On-board temperature sampling via the Linux thermal sysfs interface.

use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

use log::{info, warn};

const THERMAL_SYSFS_ROOT: &str = "/sys/class/thermal";

// Expected plausible range for the on-die sensor, in °C. Readings outside it
// are reported anyway but flagged in the log.
const PLAUSIBLE_MIN: f32 = 10.0;
const PLAUSIBLE_MAX: f32 = 50.0;

#[derive(Debug)]
pub enum SensorError {
    /// No usable thermal zone exists; the peripheral is unavailable. Fatal
    /// at initialization.
    Unavailable(String),
    /// Reading the sysfs file failed.
    Io(io::Error),
    /// The sysfs file held something other than a millidegree integer.
    Malformed(String),
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(detail) => write!(f, "temperature sensor unavailable: {}", detail),
            Self::Io(e) => write!(f, "failed to read temperature sensor: {}", e),
            Self::Malformed(raw) => write!(f, "unexpected sensor value '{}'", raw),
        }
    }
}

impl std::error::Error for SensorError {}

/// The sampling capability: one on-die temperature sensor.
pub struct ThermalProbe {
    temp_path: PathBuf,
}

impl ThermalProbe {
    /// Locate the first thermal zone. Failure here is unrecoverable; the
    /// process cannot run without its sensor.
    pub fn detect() -> Result<Self, SensorError> {
        let entries = fs::read_dir(THERMAL_SYSFS_ROOT).map_err(|e| {
            SensorError::Unavailable(format!("cannot open {}: {}", THERMAL_SYSFS_ROOT, e))
        })?;

        for entry in entries.flatten() {
            if !entry
                .file_name()
                .to_string_lossy()
                .starts_with("thermal_zone")
            {
                continue;
            }
            let temp_path = entry.path().join("temp");
            if temp_path.exists() {
                info!(
                    "using temperature sensor at {}, expected range {}~{} °C",
                    temp_path.display(),
                    PLAUSIBLE_MIN,
                    PLAUSIBLE_MAX
                );
                return Ok(ThermalProbe { temp_path });
            }
        }

        Err(SensorError::Unavailable(format!(
            "no thermal zone found under {}",
            THERMAL_SYSFS_ROOT
        )))
    }

    /// Read one sample in °C. The kernel reports millidegrees.
    pub fn sample(&self) -> Result<f32, SensorError> {
        let raw = fs::read_to_string(&self.temp_path).map_err(SensorError::Io)?;
        let celsius = parse_millidegrees(&raw)?;
        if !(PLAUSIBLE_MIN..=PLAUSIBLE_MAX).contains(&celsius) {
            warn!(
                "reading {:.2} °C is outside the expected {}~{} °C range",
                celsius, PLAUSIBLE_MIN, PLAUSIBLE_MAX
            );
        }
        Ok(celsius)
    }
}

fn parse_millidegrees(raw: &str) -> Result<f32, SensorError> {
    let millidegrees: i32 = raw
        .trim()
        .parse()
        .map_err(|_| SensorError::Malformed(raw.trim().to_string()))?;
    Ok(millidegrees as f32 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millidegrees_convert_to_celsius() {
        assert_eq!(parse_millidegrees("23400\n").unwrap(), 23.4);
        assert_eq!(parse_millidegrees("50000").unwrap(), 50.0);
        assert_eq!(parse_millidegrees("-5000").unwrap(), -5.0);
    }

    #[test]
    fn garbage_sensor_values_are_rejected() {
        assert!(matches!(
            parse_millidegrees("not-a-number"),
            Err(SensorError::Malformed(_))
        ));
        assert!(matches!(
            parse_millidegrees(""),
            Err(SensorError::Malformed(_))
        ));
    }
}
