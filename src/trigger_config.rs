use std::fmt;
use std::str::FromStr;

/// How an armed acquisition is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerMode {
    /// The controller writes `SWTrigger` once the device is acquiring.
    #[default]
    Software,
    /// An external gate/edge on the instrument's trigger input.
    Hardware,
}

impl TriggerMode {
    /// Encoding of the `TriggerMode` attribute.
    pub fn as_wire(&self) -> &'static str {
        match self {
            TriggerMode::Software => "0",
            TriggerMode::Hardware => "1",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::Software => "software",
            TriggerMode::Hardware => "hardware",
        }
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown trigger mode {0:?}")]
pub struct UnknownTriggerMode(pub String);

/// Accepts the wire encoding (`0`/`1`), the device server's names (`SOFTWARE`/`HARDWARE`)
/// and the scan engine's names (`soft`/`gate`).
impl FromStr for TriggerMode {
    type Err = UnknownTriggerMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "software" | "soft" => Ok(TriggerMode::Software),
            "1" | "hardware" | "gate" => Ok(TriggerMode::Hardware),
            _ => Err(UnknownTriggerMode(s.trim().to_string())),
        }
    }
}

/// Acquisition parameters owned by the sequencer.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionConfig {
    /// Seconds, never negative.
    pub integration_time: f64,
    pub trigger_mode: TriggerMode,
    /// Triggers per acquisition, at least 1.
    pub trigger_count: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            integration_time: 0.0,
            trigger_mode: TriggerMode::Software,
            trigger_count: 1,
        }
    }
}

impl AcquisitionConfig {
    pub fn is_software_triggered(&self) -> bool {
        self.trigger_mode == TriggerMode::Software
    }

    /// Integration time in the device's integer millisecond encoding.
    pub fn integration_time_ms(&self) -> u64 {
        seconds_to_millis(self.integration_time)
    }
}

fn seconds_to_millis(seconds: f64) -> u64 {
    (seconds * 1000.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_mode_wire() {
        assert_eq!(TriggerMode::Software.as_wire(), "0");
        assert_eq!(TriggerMode::Hardware.as_wire(), "1");
    }

    #[test]
    fn test_trigger_mode_parsing() {
        assert_eq!("0".parse::<TriggerMode>(), Ok(TriggerMode::Software));
        assert_eq!(" SOFTWARE\r".parse::<TriggerMode>(), Ok(TriggerMode::Software));
        assert_eq!("gate".parse::<TriggerMode>(), Ok(TriggerMode::Hardware));
        assert_eq!("1".parse::<TriggerMode>(), Ok(TriggerMode::Hardware));
        assert_eq!(
            "INT".parse::<TriggerMode>(),
            Err(UnknownTriggerMode("INT".to_string()))
        );
    }

    #[test]
    fn test_default_config() {
        let config = AcquisitionConfig::default();
        assert!(config.is_software_triggered());
        assert_eq!(config.trigger_count, 1);
        assert_eq!(config.integration_time_ms(), 0);
    }

    #[test]
    fn test_millisecond_conversion() {
        assert_eq!(seconds_to_millis(0.5), 500);
        assert_eq!(seconds_to_millis(0.4), 400);
        assert_eq!(seconds_to_millis(0.7), 700);
        assert_eq!(seconds_to_millis(12.0), 12_000);
    }
}
