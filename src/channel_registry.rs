use std::collections::BTreeSet;
use std::fmt;

/// Logical channel (axis) of the counter/timer unit.
///
/// Channel 1 is the timer and reports the configured integration time. Channels 2..=5
/// are the current inputs 1..=4 of the electrometer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(u8);

impl ChannelId {
    pub const MAX_CHANNELS: u8 = 5;
    pub const TIMER: ChannelId = ChannelId(1);

    pub fn new(id: u8) -> Result<Self, RegistryError> {
        if (1..=Self::MAX_CHANNELS).contains(&id) {
            Ok(Self(id))
        } else {
            Err(RegistryError::InvalidChannel(id))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn is_timer(self) -> bool {
        self == Self::TIMER
    }

    /// Physical input (1..=4) behind a data channel, `None` for the timer.
    pub fn physical_input(self) -> Option<u8> {
        if self.is_timer() {
            None
        } else {
            Some(self.0 - 1)
        }
    }

    /// Position of this channel's sample in a measurement buffer.
    pub fn buffer_index(self) -> Option<usize> {
        self.physical_input().map(|input| usize::from(input) - 1)
    }

    /// All valid channel ids, timer first.
    pub fn all() -> impl Iterator<Item = ChannelId> {
        (1..=Self::MAX_CHANNELS).map(ChannelId)
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = RegistryError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Channel {0} is out of range (1..=5)")]
    InvalidChannel(u8),

    #[error("Channel {0} is not registered")]
    UnknownChannel(ChannelId),

    #[error("Channel {0} is the timer and has no input settings")]
    TimerChannel(ChannelId),
}

/// Channels currently attached to the controller by the host.
#[derive(Debug, Default, Clone)]
pub struct ChannelRegistry {
    channels: BTreeSet<ChannelId>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering an already registered channel is a no-op.
    pub fn register(&mut self, id: ChannelId) {
        if !self.channels.insert(id) {
            log::debug!("Channel {} already registered", id);
        }
    }

    pub fn unregister(&mut self, id: ChannelId) -> Result<(), RegistryError> {
        if self.channels.remove(&id) {
            Ok(())
        } else {
            Err(RegistryError::UnknownChannel(id))
        }
    }

    /// Fails with [`RegistryError::UnknownChannel`] unless `id` is registered.
    pub fn ensure_registered(&self, id: ChannelId) -> Result<(), RegistryError> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(RegistryError::UnknownChannel(id))
        }
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.channels.contains(&id)
    }

    pub fn count(&self) -> usize {
        self.channels.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels.iter().copied()
    }
}
