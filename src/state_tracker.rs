use crate::attribute_channel::{names, AttributeChannel, CommFailure};
use std::fmt;

/// State of the counter/timer unit as seen by the scan engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalState {
    /// Device on but not stopped into a known configuration.
    Idle,
    /// Stopped and ready to be started.
    Standby,
    /// Acquisition in progress.
    Acquiring,
}

impl LogicalState {
    /// Fixed mapping from the device's `AcqState` values.
    pub fn from_raw(raw: &str) -> Result<Self, StateError> {
        match raw.trim() {
            "STATE_ON" => Ok(LogicalState::Standby),
            "STATE_RUNNING" => Ok(LogicalState::Idle),
            "STATE_ACQUIRING" => Ok(LogicalState::Acquiring),
            other => Err(StateError::Unmapped {
                raw: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalState::Idle => "idle",
            LogicalState::Standby => "standby",
            LogicalState::Acquiring => "acquiring",
        }
    }
}

impl fmt::Display for LogicalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Communication error: {0}")]
    Comm(#[from] CommFailure),

    #[error("Device reported unknown acquisition state {raw:?}")]
    Unmapped { raw: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    pub state: LogicalState,
    pub status: String,
}

/// Last known state of the electrometer.
#[derive(Debug, Default)]
pub struct StateTracker {
    last: Option<StateSnapshot>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-read `AcqState` and `Status` from the device.
    ///
    /// The cached snapshot is only replaced when both reads succeed and the state maps.
    pub fn refresh(
        &mut self,
        channel: &mut dyn AttributeChannel,
    ) -> Result<StateSnapshot, StateError> {
        let raw = channel.read_attribute(names::ACQ_STATE)?;
        let state = LogicalState::from_raw(&raw)?;
        let status = channel.read_attribute(names::STATUS)?;

        let snapshot = StateSnapshot { state, status };
        log::debug!("Read state {} ({})", snapshot.state, raw.trim());
        self.last = Some(snapshot.clone());
        Ok(snapshot)
    }

    pub fn last(&self) -> Option<&StateSnapshot> {
        self.last.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_device::MockDevice;

    #[test]
    fn test_raw_state_mapping() {
        assert_eq!(
            LogicalState::from_raw("STATE_ON").unwrap(),
            LogicalState::Standby
        );
        assert_eq!(
            LogicalState::from_raw("STATE_RUNNING").unwrap(),
            LogicalState::Idle
        );
        assert_eq!(
            LogicalState::from_raw(" STATE_ACQUIRING\r\n").unwrap(),
            LogicalState::Acquiring
        );
    }

    #[test]
    fn test_unmapped_state() {
        match LogicalState::from_raw("STATE_FAULT") {
            Err(StateError::Unmapped { raw }) => assert_eq!(raw, "STATE_FAULT"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_refresh_reads_both_attributes() {
        let device = MockDevice::new();
        device.set("AcqState", "STATE_ACQUIRING");
        device.set("Status", "Acquiring 3 of 10");
        let mut channel = device.clone();

        let mut tracker = StateTracker::new();
        assert!(tracker.last().is_none());

        let snapshot = tracker.refresh(&mut channel).unwrap();
        assert_eq!(snapshot.state, LogicalState::Acquiring);
        assert_eq!(snapshot.status, "Acquiring 3 of 10");
        assert_eq!(tracker.last(), Some(&snapshot));
        assert_eq!(device.reads_of("AcqState"), 1);
        assert_eq!(device.reads_of("Status"), 1);

        tracker.refresh(&mut channel).unwrap();
        assert_eq!(device.reads_of("AcqState"), 2);
    }

    #[test]
    fn test_refresh_keeps_previous_snapshot_on_unmapped() {
        let device = MockDevice::new();
        let mut channel = device.clone();
        let mut tracker = StateTracker::new();
        tracker.refresh(&mut channel).unwrap();

        device.set("AcqState", "STATE_BOGUS");
        assert!(matches!(
            tracker.refresh(&mut channel),
            Err(StateError::Unmapped { .. })
        ));
        assert_eq!(tracker.last().unwrap().state, LogicalState::Standby);
    }
}
