use crate::attribute_channel::{AttributeChannel, CommFailure};
use crate::channel_registry::{ChannelId, RegistryError};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Analog front-end setting of one current input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelSetting {
    /// Current range, e.g. `1mA`.
    Range,
    /// Low-pass filter, e.g. `NO` or `100Hz`.
    Filter,
    /// Digital inversion of the signal.
    Inversion,
}

impl ChannelSetting {
    fn attribute_prefix(&self) -> &'static str {
        match self {
            ChannelSetting::Range => "CARangeCh",
            ChannelSetting::Filter => "CAFilterCh",
            ChannelSetting::Inversion => "CAInversionCh",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelSetting::Range => "Range",
            ChannelSetting::Filter => "Filter",
            ChannelSetting::Inversion => "Inversion",
        }
    }

    /// Device attribute holding this setting for channel `id`.
    pub fn attribute_name(&self, id: ChannelId) -> Result<String, RegistryError> {
        let input = id
            .physical_input()
            .ok_or(RegistryError::TimerChannel(id))?;
        Ok(format!("{}{}", self.attribute_prefix(), input))
    }
}

impl fmt::Display for ChannelSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown channel setting {0:?}")]
pub struct UnknownSetting(pub String);

impl FromStr for ChannelSetting {
    type Err = UnknownSetting;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "range" => Ok(ChannelSetting::Range),
            "filter" => Ok(ChannelSetting::Filter),
            "inversion" | "dinversion" => Ok(ChannelSetting::Inversion),
            _ => Err(UnknownSetting(s.to_string())),
        }
    }
}

/// Last known front-end settings, keyed by channel.
#[derive(Debug, Default)]
pub struct ChannelSettings {
    values: HashMap<ChannelId, HashMap<ChannelSetting, String>>,
}

impl ChannelSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a setting from the device and remember it.
    pub fn read(
        &mut self,
        device: &mut dyn AttributeChannel,
        id: ChannelId,
        setting: ChannelSetting,
        attribute: &str,
    ) -> Result<String, CommFailure> {
        let value = device.read_attribute(attribute)?.trim().to_string();
        self.remember(id, setting, &value);
        Ok(value)
    }

    /// Write a setting to the device; only remembered once the device accepted it.
    pub fn write(
        &mut self,
        device: &mut dyn AttributeChannel,
        id: ChannelId,
        setting: ChannelSetting,
        attribute: &str,
        value: &str,
    ) -> Result<(), CommFailure> {
        device.write_attribute(attribute, value)?;
        self.remember(id, setting, value);
        Ok(())
    }

    fn remember(&mut self, id: ChannelId, setting: ChannelSetting, value: &str) {
        self.values
            .entry(id)
            .or_default()
            .insert(setting, value.to_string());
    }

    pub fn cached(&self, id: ChannelId, setting: ChannelSetting) -> Option<&str> {
        self.values
            .get(&id)
            .and_then(|settings| settings.get(&setting))
            .map(String::as_str)
    }

    pub fn forget(&mut self, id: ChannelId) {
        self.values.remove(&id);
    }
}
