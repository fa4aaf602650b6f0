use crate::attribute_channel::AttributeChannel;
use crate::channel_registry::{ChannelId, ChannelRegistry, RegistryError};
use crate::channel_settings::{ChannelSetting, ChannelSettings};
use crate::config::ControllerConfig;
use crate::fault_barrier::{Diagnostic, FaultBarrier, Outcome};
use crate::sequencer::{AcquisitionError, AcquisitionSequencer};
use crate::state_tracker::{LogicalState, StateSnapshot};
use crate::trigger_config::{AcquisitionConfig, TriggerMode};

/// Counter/timer controller for one AlbaEM# electrometer.
///
/// Channel 1 is the timer, channels 2..=5 the four current inputs. A scan drives one
/// acquisition per point: [`load_one`](Self::load_one) on the timer,
/// [`pre_start_all`](Self::pre_start_all), [`pre_start_one`](Self::pre_start_one) per
/// channel, [`start_all`](Self::start_all), then [`state_all`](Self::state_all) until the
/// device leaves acquiring, [`read_all`](Self::read_all) and [`read_one`](Self::read_one)
/// per channel.
///
/// Device faults never surface as `Err`: they come back as [`Outcome::Reported`] after
/// being logged. `Err` is reserved for misuse (unknown channels, invalid values) and for
/// device states the controller does not understand.
#[derive(Debug)]
pub struct EmController {
    config: ControllerConfig,
    sequencer: AcquisitionSequencer,
    registry: ChannelRegistry,
    settings: ChannelSettings,
    barrier: FaultBarrier,
}

impl EmController {
    /// Channels this controller can host.
    pub const MAX_DEVICE: u8 = ChannelId::MAX_CHANNELS;

    /// Connect to the electrometer named in `config`.
    ///
    /// An unreachable instrument does not fail construction: the controller comes up
    /// unconnected and reports every device operation until it is recreated.
    pub fn connect(config: ControllerConfig) -> Result<Self, AcquisitionError> {
        let mut controller = Self::unconnected(config);
        let outcome = controller
            .barrier
            .guard("connect", || controller.sequencer.connect(&controller.config))?;

        if outcome.is_done() {
            controller.initialize()?;
        } else {
            log::error!(
                "Could not connect with {}, continuing unconnected",
                controller.config.device_address
            );
        }
        Ok(controller)
    }

    /// Build a controller on top of an existing attribute channel.
    pub fn with_channel(
        config: ControllerConfig,
        channel: Box<dyn AttributeChannel>,
    ) -> Result<Self, AcquisitionError> {
        let mut controller = Self::unconnected(config);
        controller.sequencer.attach(channel);
        controller.initialize()?;
        Ok(controller)
    }

    fn unconnected(config: ControllerConfig) -> Self {
        let sequencer = AcquisitionSequencer::new(&config);
        Self {
            config,
            sequencer,
            registry: ChannelRegistry::new(),
            settings: ChannelSettings::new(),
            barrier: FaultBarrier::new(),
        }
    }

    fn initialize(&mut self) -> Result<(), AcquisitionError> {
        let sequencer = &mut self.sequencer;
        let outcome = self.barrier.guard("initialize", || {
            let snapshot = sequencer.refresh_state()?;
            log::debug!("Initial state {} ({})", snapshot.state, snapshot.status);
            sequencer.configure_default_trigger()
        })?;
        if outcome.is_reported() {
            log::warn!("Electrometer connected but could not be initialized");
        }
        Ok(())
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn acquisition_config(&self) -> &AcquisitionConfig {
        self.sequencer.config()
    }

    pub fn is_connected(&self) -> bool {
        self.sequencer.is_connected()
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Faults contained since start-up.
    pub fn fault_count(&self) -> u64 {
        self.barrier.reported()
    }

    pub fn last_fault(&self) -> Option<&Diagnostic> {
        self.barrier.last()
    }

    pub fn add_channel(&mut self, axis: u8) -> Result<(), AcquisitionError> {
        log::debug!("add_channel({})", axis);
        self.registry.register(ChannelId::new(axis)?);
        Ok(())
    }

    pub fn remove_channel(&mut self, axis: u8) -> Result<(), AcquisitionError> {
        log::debug!("remove_channel({})", axis);
        let id = ChannelId::new(axis)?;
        self.registry.unregister(id)?;
        self.settings.forget(id);
        Ok(())
    }

    fn registered(&self, axis: u8) -> Result<ChannelId, AcquisitionError> {
        let id = ChannelId::new(axis)?;
        self.registry.ensure_registered(id)?;
        Ok(id)
    }

    /// Last state read from the device; all channels share it. `None` before the first
    /// successful read.
    pub fn state_one(&self, axis: u8) -> Result<Option<StateSnapshot>, AcquisitionError> {
        ChannelId::new(axis)?;
        Ok(self.sequencer.last_state().cloned())
    }

    pub fn state_all(&mut self) -> Result<Outcome<LogicalState>, AcquisitionError> {
        let sequencer = &mut self.sequencer;
        let outcome = self
            .barrier
            .guard("state_all", || sequencer.refresh_state())?;
        Ok(outcome.map(|snapshot| snapshot.state))
    }

    /// Set the integration time. Only the timer channel carries it; other channels are
    /// accepted and ignored.
    pub fn load_one(&mut self, axis: u8, seconds: f64) -> Result<Outcome<()>, AcquisitionError> {
        log::debug!("load_one({}, {})", axis, seconds);
        let id = ChannelId::new(axis)?;
        if !id.is_timer() {
            return Ok(Outcome::Done(()));
        }

        let sequencer = &mut self.sequencer;
        self.barrier.guard("load_one", || {
            sequencer.configure_integration_time(seconds)
        })
    }

    pub fn pre_start_all(&mut self) -> Result<Outcome<()>, AcquisitionError> {
        log::debug!("pre_start_all()");
        let sequencer = &mut self.sequencer;
        self.barrier
            .guard("pre_start_all", || sequencer.arm_for_start())
    }

    pub fn pre_start_one(&mut self, axis: u8) -> Result<(), AcquisitionError> {
        log::debug!("pre_start_one({})", axis);
        let id = self.registered(axis)?;
        self.sequencer.mark_for_start(id);
        Ok(())
    }

    pub fn start_all(&mut self) -> Result<Outcome<()>, AcquisitionError> {
        log::debug!("start_all()");
        let sequencer = &mut self.sequencer;
        self.barrier.guard("start_all", || sequencer.start())
    }

    /// Fetch the values of the last acquisition if it has finished. `Done(false)` means the
    /// device was still acquiring and nothing changed.
    pub fn read_all(&mut self) -> Result<Outcome<bool>, AcquisitionError> {
        log::debug!("read_all()");
        let sequencer = &mut self.sequencer;
        self.barrier
            .guard("read_all", || sequencer.extract_measurements())
    }

    /// Timer: the configured integration time. Inputs: the value from the last
    /// [`read_all`](Self::read_all), NaN if there is none.
    pub fn read_one(&self, axis: u8) -> Result<f64, AcquisitionError> {
        let id = self.registered(axis)?;
        match id.buffer_index() {
            None => Ok(self.sequencer.config().integration_time),
            Some(index) => Ok(self
                .sequencer
                .measurements()
                .get(index)
                .unwrap_or(f64::NAN)),
        }
    }

    /// Channels cannot be stopped individually; the acquisition is stopped by
    /// [`abort_all`](Self::abort_all).
    pub fn abort_one(&mut self, axis: u8) -> Result<(), AcquisitionError> {
        log::debug!("abort_one({})", axis);
        ChannelId::new(axis)?;
        Ok(())
    }

    pub fn abort_all(&mut self) -> Result<Outcome<()>, AcquisitionError> {
        log::debug!("abort_all()");
        let sequencer = &mut self.sequencer;
        self.barrier
            .guard("abort_all", || sequencer.stop_acquisition())
    }

    pub fn channel_setting(
        &mut self,
        axis: u8,
        setting: ChannelSetting,
    ) -> Result<Outcome<String>, AcquisitionError> {
        let id = self.registered(axis)?;
        let attribute = setting.attribute_name(id)?;
        let (sequencer, settings) = (&mut self.sequencer, &mut self.settings);
        self.barrier.guard("channel_setting", || {
            Ok(settings.read(sequencer.device()?, id, setting, &attribute)?)
        })
    }

    pub fn set_channel_setting(
        &mut self,
        axis: u8,
        setting: ChannelSetting,
        value: &str,
    ) -> Result<Outcome<()>, AcquisitionError> {
        let id = self.registered(axis)?;
        let attribute = setting.attribute_name(id)?;
        let (sequencer, settings) = (&mut self.sequencer, &mut self.settings);
        self.barrier.guard("set_channel_setting", || {
            Ok(settings.write(sequencer.device()?, id, setting, &attribute, value)?)
        })
    }

    /// Last value read or written for a setting, without asking the device.
    pub fn cached_channel_setting(&self, axis: u8, setting: ChannelSetting) -> Option<&str> {
        let id = ChannelId::new(axis).ok()?;
        self.settings.cached(id, setting)
    }

    pub fn trigger_mode(&mut self) -> Result<Outcome<TriggerMode>, AcquisitionError> {
        let sequencer = &mut self.sequencer;
        self.barrier
            .guard("trigger_mode", || sequencer.read_trigger_mode())
    }

    pub fn set_trigger_mode(&mut self, mode: TriggerMode) -> Result<Outcome<()>, AcquisitionError> {
        let sequencer = &mut self.sequencer;
        self.barrier
            .guard("set_trigger_mode", || sequencer.set_trigger_mode(mode))
    }

    pub fn nr_of_triggers(&mut self) -> Result<Outcome<u32>, AcquisitionError> {
        let sequencer = &mut self.sequencer;
        self.barrier
            .guard("nr_of_triggers", || sequencer.read_trigger_count())
    }

    pub fn set_nr_of_triggers(&mut self, count: u32) -> Result<Outcome<()>, AcquisitionError> {
        let sequencer = &mut self.sequencer;
        self.barrier
            .guard("set_nr_of_triggers", || sequencer.set_trigger_count(count))
    }

    /// Full sample buffer of one current input.
    pub fn channel_data(&mut self, axis: u8) -> Result<Outcome<Vec<f64>>, AcquisitionError> {
        let id = self.registered(axis)?;
        if id.is_timer() {
            return Err(RegistryError::TimerChannel(id).into());
        }
        let sequencer = &mut self.sequencer;
        self.barrier
            .guard("channel_data", || sequencer.read_channel_series(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault_barrier::FaultKind;
    use crate::mock_device::MockDevice;

    fn test_config() -> ControllerConfig {
        ControllerConfig {
            settle_delay_ms: 0,
            start_timeout_ms: 100,
            ..ControllerConfig::default()
        }
    }

    fn controller(device: &MockDevice) -> EmController {
        let mut controller =
            EmController::with_channel(test_config(), Box::new(device.clone())).unwrap();
        for axis in 1..=EmController::MAX_DEVICE {
            controller.add_channel(axis).unwrap();
        }
        controller
    }

    fn unconnected() -> EmController {
        let mut controller = EmController::unconnected(test_config());
        for axis in 1..=EmController::MAX_DEVICE {
            controller.add_channel(axis).unwrap();
        }
        controller
    }

    #[test]
    fn test_initialization_configures_default_trigger() {
        let device = MockDevice::new();
        device.set("TriggerMode", "1");
        let controller = controller(&device);

        assert!(controller.is_connected());
        assert_eq!(device.writes_to("NTrig"), vec!["1".to_string()]);
        assert_eq!(device.writes_to("TriggerMode"), vec!["0".to_string()]);
        assert_eq!(
            controller.state_one(3).unwrap().unwrap().state,
            LogicalState::Standby
        );
    }

    #[test]
    fn test_unreachable_device_degrades() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = ControllerConfig {
            device_address: format!("127.0.0.1:{}", port),
            ..test_config()
        };

        let mut controller = EmController::connect(config).unwrap();
        assert!(!controller.is_connected());
        assert_eq!(controller.fault_count(), 1);
        assert_eq!(controller.last_fault().unwrap().kind, FaultKind::Unreachable);

        let outcome = controller.state_all().unwrap();
        assert!(outcome.is_reported());
        assert_eq!(controller.fault_count(), 2);
    }

    #[test]
    fn test_channel_registration() {
        let mut controller = unconnected();
        assert_eq!(controller.registry().count(), 5);

        for axis in 1..=5 {
            controller.remove_channel(axis).unwrap();
        }
        assert_eq!(controller.registry().count(), 0);

        assert!(matches!(
            controller.remove_channel(2),
            Err(AcquisitionError::Registry(RegistryError::UnknownChannel(_)))
        ));
        assert!(matches!(
            controller.add_channel(6),
            Err(AcquisitionError::Registry(RegistryError::InvalidChannel(6)))
        ));
    }

    #[test]
    fn test_read_unregistered_channel() {
        let mut controller = unconnected();
        controller.remove_channel(4).unwrap();
        assert!(matches!(
            controller.read_one(4),
            Err(AcquisitionError::Registry(RegistryError::UnknownChannel(_)))
        ));
    }

    #[test]
    fn test_timer_reads_integration_time_without_device() {
        let mut controller = unconnected();

        let outcome = controller.load_one(1, 0.25).unwrap();
        assert!(outcome.is_reported());
        assert_eq!(controller.read_one(1).unwrap(), 0.25);
        for axis in 2..=5 {
            assert!(controller.read_one(axis).unwrap().is_nan());
        }
    }

    #[test]
    fn test_load_one_ignores_data_channels() {
        let device = MockDevice::new();
        let mut controller = controller(&device);

        assert!(controller.load_one(3, 2.0).unwrap().is_done());
        assert!(device.writes_to("AcqTime").is_empty());
        assert_eq!(controller.read_one(1).unwrap(), 0.0);

        assert!(controller.load_one(1, 0.5).unwrap().is_done());
        assert_eq!(device.get("AcqTime").as_deref(), Some("500"));
        assert!(matches!(
            controller.load_one(1, -0.5),
            Err(AcquisitionError::InvalidIntegrationTime(_))
        ));
    }

    #[test]
    fn test_full_acquisition_cycle() {
        let device = MockDevice::new();
        let mut controller = controller(&device);

        assert!(controller.load_one(1, 0.1).unwrap().is_done());
        assert!(controller.pre_start_all().unwrap().is_done());
        for axis in 1..=5 {
            controller.pre_start_one(axis).unwrap();
        }

        device.script_states(&["STATE_RUNNING", "STATE_ACQUIRING"]);
        assert!(controller.start_all().unwrap().is_done());
        assert_eq!(device.writes_to("SWTrigger").len(), 1);

        // still acquiring: nothing to read yet
        assert_eq!(
            controller.state_all().unwrap(),
            Outcome::Done(LogicalState::Acquiring)
        );
        assert_eq!(controller.read_all().unwrap(), Outcome::Done(false));
        assert!(controller.read_one(2).unwrap().is_nan());

        device.set("AcqState", "STATE_ON");
        device.set("Meas", "[['CHAN01', '1.5'], ['CHAN02', '-2.25'], ['CHAN03', '0.5'], ['CHAN04', '4.0']]");
        assert_eq!(
            controller.state_all().unwrap(),
            Outcome::Done(LogicalState::Standby)
        );
        assert_eq!(controller.read_all().unwrap(), Outcome::Done(true));

        assert_eq!(controller.read_one(1).unwrap(), 0.1);
        assert_eq!(controller.read_one(2).unwrap(), 1.5);
        assert_eq!(controller.read_one(3).unwrap(), -2.25);
        assert_eq!(controller.read_one(4).unwrap(), 0.5);
        assert_eq!(controller.read_one(5).unwrap(), 4.0);

        assert!(controller.abort_all().unwrap().is_done());
        assert_eq!(controller.fault_count(), 0);
    }

    #[test]
    fn test_short_payload_is_reported() {
        let device = MockDevice::new();
        let mut controller = controller(&device);
        device.set("Meas", "CH1: 1.5 CH2: 0 CH3: 2.5 CH4: 3.5");

        let outcome = controller.read_all().unwrap();
        let diagnostic = outcome.diagnostic().unwrap();
        assert_eq!(diagnostic.kind, FaultKind::Unexpected);
        assert_eq!(diagnostic.reason, "MalformedPayload");
        for axis in 2..=5 {
            assert!(controller.read_one(axis).unwrap().is_nan());
        }
    }

    #[test]
    fn test_start_timeout_is_reported() {
        let device = MockDevice::new();
        let mut controller = controller(&device);
        device.script_states(&["STATE_RUNNING"]);

        let outcome = controller.start_all().unwrap();
        assert_eq!(outcome.diagnostic().unwrap().reason, "Timeout");
        assert!(device.writes_to("SWTrigger").is_empty());
    }

    #[test]
    fn test_comm_failure_is_reported() {
        let device = MockDevice::new();
        let mut controller = controller(&device);
        device.fail("AcqStop");

        let outcome = controller.abort_all().unwrap();
        let diagnostic = outcome.diagnostic().unwrap();
        assert_eq!(diagnostic.kind, FaultKind::Communication);
        assert_eq!(diagnostic.operation, "abort_all");
        assert_eq!(diagnostic.reason, "API_DeviceTimedOut");
    }

    #[test]
    fn test_unmapped_state_is_fatal() {
        let device = MockDevice::new();
        let mut controller = controller(&device);
        device.set("AcqState", "STATE_FAULT");

        assert!(matches!(
            controller.state_all(),
            Err(AcquisitionError::UnmappedState { .. })
        ));
    }

    #[test]
    fn test_channel_settings() {
        let device = MockDevice::new();
        device.set("CARangeCh2", "100uA");
        let mut controller = controller(&device);

        assert_eq!(
            controller.channel_setting(3, ChannelSetting::Range).unwrap(),
            Outcome::Done("100uA".to_string())
        );
        assert!(controller
            .set_channel_setting(5, ChannelSetting::Filter, "NO")
            .unwrap()
            .is_done());
        assert_eq!(device.get("CAFilterCh4").as_deref(), Some("NO"));
        assert_eq!(
            controller.cached_channel_setting(5, ChannelSetting::Filter),
            Some("NO")
        );

        assert!(matches!(
            controller.channel_setting(1, ChannelSetting::Range),
            Err(AcquisitionError::Registry(RegistryError::TimerChannel(_)))
        ));
    }

    #[test]
    fn test_trigger_attributes() {
        let device = MockDevice::new();
        let mut controller = controller(&device);

        assert!(controller
            .set_trigger_mode(TriggerMode::Hardware)
            .unwrap()
            .is_done());
        assert_eq!(
            controller.trigger_mode().unwrap(),
            Outcome::Done(TriggerMode::Hardware)
        );

        assert!(controller.set_nr_of_triggers(5).unwrap().is_done());
        assert_eq!(controller.nr_of_triggers().unwrap(), Outcome::Done(5));
        assert_eq!(controller.acquisition_config().trigger_count, 5);
    }

    #[test]
    fn test_channel_data() {
        let device = MockDevice::new();
        device.set("CurrentCh1", "[0.5, 0.75]");
        let mut controller = controller(&device);

        assert_eq!(
            controller.channel_data(2).unwrap(),
            Outcome::Done(vec![0.5, 0.75])
        );
        assert!(controller.channel_data(1).is_err());
    }

    #[test]
    fn test_abort_one_is_noop() {
        let device = MockDevice::new();
        let mut controller = controller(&device);
        let before = device.calls().len();

        controller.abort_one(2).unwrap();
        assert_eq!(device.calls().len(), before);
    }
}
