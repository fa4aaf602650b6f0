use crate::attribute_channel::{names, AttributeChannel, CommFailure};
use crate::channel_registry::{ChannelId, RegistryError};
use crate::config::ControllerConfig;
use crate::em_connector::{EmConnector, EmConnectorError};
use crate::measurement::{self, ExtractionStrategy, MeasurementBuffer, MeasurementError};
use crate::state_tracker::{LogicalState, StateError, StateSnapshot, StateTracker};
use crate::trigger_config::{AcquisitionConfig, TriggerMode};
use std::thread;
use std::time::{Duration, Instant};

/// Current inputs of the electrometer.
pub const DATA_CHANNELS: u8 = ChannelId::MAX_CHANNELS - 1;

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("Communication error: {0}")]
    Comm(#[from] CommFailure),

    #[error("Electrometer is not connected")]
    NotConnected,

    #[error(transparent)]
    Unreachable(#[from] EmConnectorError),

    #[error("Device still {last} after {waited:?} ({polls} polls), expected {expected}")]
    Timeout {
        expected: LogicalState,
        last: LogicalState,
        waited: Duration,
        polls: u32,
    },

    #[error("Malformed measurement: {0}")]
    Malformed(#[from] MeasurementError),

    #[error("Unexpected value {value:?} in attribute {attribute}")]
    UnexpectedValue { attribute: String, value: String },

    #[error("Device reported unknown acquisition state {raw:?}")]
    UnmappedState { raw: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Integration time must be a finite, non-negative number of seconds, got {0}")]
    InvalidIntegrationTime(f64),

    #[error("Trigger count must be at least 1, got {0}")]
    InvalidTriggerCount(u32),
}

impl From<StateError> for AcquisitionError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Comm(failure) => AcquisitionError::Comm(failure),
            StateError::Unmapped { raw } => AcquisitionError::UnmappedState { raw },
        }
    }
}

/// Pacing of the sequencer's device interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerTiming {
    pub settle_delay: Duration,
    pub start_timeout: Duration,
    pub poll_interval: Duration,
}

impl From<&ControllerConfig> for SequencerTiming {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            settle_delay: config.settle_delay(),
            start_timeout: config.start_timeout(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// Drives the electrometer through configure, arm, start and readout.
///
/// Every state transition is confirmed by reading the device back; the sequencer never
/// assumes it is acquiring just because it asked to start.
pub struct AcquisitionSequencer {
    channel: Option<Box<dyn AttributeChannel>>,
    tracker: StateTracker,
    config: AcquisitionConfig,
    buffer: MeasurementBuffer,
    started: Vec<ChannelId>,
    timing: SequencerTiming,
    extraction: ExtractionStrategy,
}

impl std::fmt::Debug for AcquisitionSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionSequencer")
            .field("connected", &self.is_connected())
            .field("config", &self.config)
            .field("buffer", &self.buffer)
            .field("started", &self.started)
            .field("timing", &self.timing)
            .field("extraction", &self.extraction)
            .finish_non_exhaustive()
    }
}

impl AcquisitionSequencer {
    /// A sequencer without a device. Every device operation reports `NotConnected`
    /// until [`connect`](Self::connect) or [`attach`](Self::attach) succeeds.
    pub fn new(settings: &ControllerConfig) -> Self {
        Self {
            channel: None,
            tracker: StateTracker::new(),
            config: AcquisitionConfig::default(),
            buffer: MeasurementBuffer::default(),
            started: Vec::new(),
            timing: SequencerTiming::from(settings),
            extraction: settings.extraction,
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(address = %settings.device_address))]
    pub fn connect(&mut self, settings: &ControllerConfig) -> Result<(), AcquisitionError> {
        let terminal = EmConnector::connect(settings)?;
        self.attach(Box::new(terminal));
        Ok(())
    }

    /// Use an already established attribute channel.
    pub fn attach(&mut self, channel: Box<dyn AttributeChannel>) {
        self.channel = Some(channel);
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    pub fn measurements(&self) -> &MeasurementBuffer {
        &self.buffer
    }

    pub fn last_state(&self) -> Option<&StateSnapshot> {
        self.tracker.last()
    }

    /// Channels the host pre-started in the current cycle.
    pub fn started_channels(&self) -> &[ChannelId] {
        &self.started
    }

    pub(crate) fn device(&mut self) -> Result<&mut dyn AttributeChannel, AcquisitionError> {
        match self.channel.as_deref_mut() {
            Some(channel) => Ok(channel),
            None => Err(AcquisitionError::NotConnected),
        }
    }

    pub fn refresh_state(&mut self) -> Result<StateSnapshot, AcquisitionError> {
        let device = match self.channel.as_deref_mut() {
            Some(channel) => channel,
            None => return Err(AcquisitionError::NotConnected),
        };
        Ok(self.tracker.refresh(device)?)
    }

    fn write_settled(&mut self, name: &str, value: &str) -> Result<(), AcquisitionError> {
        self.device()?.write_attribute(name, value)?;
        thread::sleep(self.timing.settle_delay);
        Ok(())
    }

    /// One software trigger per acquisition.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn configure_default_trigger(&mut self) -> Result<(), AcquisitionError> {
        self.write_settled(names::TRIGGER_COUNT, "1")?;
        self.write_settled(names::TRIGGER_MODE, TriggerMode::Software.as_wire())?;
        self.config.trigger_count = 1;
        self.config.trigger_mode = TriggerMode::Software;
        Ok(())
    }

    pub fn set_trigger_mode(&mut self, mode: TriggerMode) -> Result<(), AcquisitionError> {
        self.write_settled(names::TRIGGER_MODE, mode.as_wire())?;
        self.config.trigger_mode = mode;
        Ok(())
    }

    pub fn set_trigger_count(&mut self, count: u32) -> Result<(), AcquisitionError> {
        if count == 0 {
            return Err(AcquisitionError::InvalidTriggerCount(count));
        }
        self.write_settled(names::TRIGGER_COUNT, &count.to_string())?;
        self.config.trigger_count = count;
        Ok(())
    }

    pub fn read_trigger_mode(&mut self) -> Result<TriggerMode, AcquisitionError> {
        let value = self.device()?.read_attribute(names::TRIGGER_MODE)?;
        value
            .parse()
            .map_err(|_| AcquisitionError::UnexpectedValue {
                attribute: names::TRIGGER_MODE.to_string(),
                value,
            })
    }

    pub fn read_trigger_count(&mut self) -> Result<u32, AcquisitionError> {
        let value = self.device()?.read_attribute(names::TRIGGER_COUNT)?;
        value
            .trim()
            .parse()
            .map_err(|_| AcquisitionError::UnexpectedValue {
                attribute: names::TRIGGER_COUNT.to_string(),
                value,
            })
    }

    /// Safe in any state; stopping a stopped device is a no-op on its side.
    pub fn stop_acquisition(&mut self) -> Result<(), AcquisitionError> {
        log::debug!("Stopping acquisition");
        self.device()?.write_attribute(names::ACQ_STOP, names::FIRE)?;
        Ok(())
    }

    /// Record the integration time and push it to the device.
    ///
    /// The value is kept even if the device cannot be reached, so the timer channel keeps
    /// reporting what the scan asked for.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn configure_integration_time(&mut self, seconds: f64) -> Result<(), AcquisitionError> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(AcquisitionError::InvalidIntegrationTime(seconds));
        }
        self.config.integration_time = seconds;

        // The device ignores AcqTime while armed or acquiring.
        self.stop_acquisition()?;
        thread::sleep(self.timing.settle_delay);

        let millis = self.config.integration_time_ms();
        log::debug!("Setting integration time to {} ms", millis);
        self.device()?
            .write_attribute(names::ACQ_TIME, &millis.to_string())?;
        Ok(())
    }

    /// Forget the previous cycle's started channels and put the device into a known
    /// stopped state.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn arm_for_start(&mut self) -> Result<(), AcquisitionError> {
        self.started.clear();
        self.stop_acquisition()
    }

    pub fn mark_for_start(&mut self, id: ChannelId) {
        if !self.started.contains(&id) {
            self.started.push(id);
        }
    }

    /// Start the acquisition and, for software triggering, release it once the device
    /// confirms it is acquiring.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn start(&mut self) -> Result<(), AcquisitionError> {
        self.device()?
            .write_attribute(names::ACQ_START, names::FIRE)?;
        self.wait_for(LogicalState::Acquiring)?;

        if self.config.is_software_triggered() {
            log::debug!("Sending software trigger");
            self.device()?
                .write_attribute(names::SW_TRIGGER, names::FIRE)?;
        }
        Ok(())
    }

    /// Poll the device until it reports `expected`, bounded by the start timeout.
    fn wait_for(&mut self, expected: LogicalState) -> Result<(), AcquisitionError> {
        let begin = Instant::now();
        let mut polls = 0u32;

        loop {
            let snapshot = self.refresh_state()?;
            polls += 1;
            if snapshot.state == expected {
                log::debug!("Device {} after {} polls", expected, polls);
                return Ok(());
            }

            let waited = begin.elapsed();
            if waited >= self.timing.start_timeout {
                return Err(AcquisitionError::Timeout {
                    expected,
                    last: snapshot.state,
                    waited,
                    polls,
                });
            }
            if !self.timing.poll_interval.is_zero() {
                thread::sleep(self.timing.poll_interval);
            }
        }
    }

    /// Fetch the values of a finished acquisition.
    ///
    /// Returns `false` without touching the buffer while the device is still acquiring.
    /// Otherwise the previous buffer is dropped before the new payload is read, so a
    /// failed read never leaves an older cycle's values behind. An aggregate payload
    /// without exactly one value per input is rejected as malformed.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn extract_measurements(&mut self) -> Result<bool, AcquisitionError> {
        let snapshot = self.refresh_state()?;
        if snapshot.state == LogicalState::Acquiring {
            log::debug!("Still acquiring, measurements not ready");
            return Ok(false);
        }

        self.buffer = MeasurementBuffer::default();
        let values = match self.extraction {
            ExtractionStrategy::Aggregate => {
                let payload = self.device()?.read_attribute(names::MEASUREMENTS)?;
                measurement::extract_channels(&payload, usize::from(DATA_CHANNELS))?
            }
            ExtractionStrategy::PerChannel => {
                let device = self.device()?;
                let mut values = Vec::with_capacity(usize::from(DATA_CHANNELS));
                for input in 1..=DATA_CHANNELS {
                    let payload = device.read_attribute(&names::current(input))?;
                    values.push(measurement::extract_last(&payload)?);
                }
                values
            }
        };

        log::debug!("Measurements: {:?}", values);
        self.buffer = MeasurementBuffer::new(values);
        Ok(true)
    }

    /// Every sample currently held in one input's buffer.
    pub fn read_channel_series(&mut self, id: ChannelId) -> Result<Vec<f64>, AcquisitionError> {
        let input = id
            .physical_input()
            .ok_or(RegistryError::TimerChannel(id))?;
        let payload = self.device()?.read_attribute(&names::current(input))?;
        Ok(measurement::extract_series(&payload)?)
    }
}
