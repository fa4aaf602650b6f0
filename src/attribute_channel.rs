//! Remote attribute access.
//!
//! The electrometer's device server is treated as a plain attribute store: every
//! interaction is either a read or a write of a named attribute holding a string-encoded
//! scalar. Nothing is cached here; each call is a round-trip to the instrument.

/// Names of the attributes the controller reads and writes on the device server.
pub mod names {
    pub const ACQ_STATE: &str = "AcqState";
    pub const STATUS: &str = "Status";
    pub const ACQ_START: &str = "AcqStart";
    pub const ACQ_STOP: &str = "AcqStop";
    pub const TRIGGER_MODE: &str = "TriggerMode";
    pub const TRIGGER_COUNT: &str = "NTrig";
    pub const ACQ_TIME: &str = "AcqTime";
    pub const SW_TRIGGER: &str = "SWTrigger";
    pub const MEASUREMENTS: &str = "Meas";

    /// Command attributes are fired by writing this value.
    pub const FIRE: &str = "1";

    /// Per-channel current buffer, `physical` in `1..=4`.
    pub fn current(physical: u8) -> String {
        format!("CurrentCh{}", physical)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommFailure {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(
        "Timeout error: Expected terminator {expected:?} but got {actual:?}. Likely due to a timeout."
    )]
    Timeout { expected: String, actual: String },

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Device rejected '{origin}': {reason}: {description}")]
    Device {
        reason: String,
        description: String,
        origin: String,
    },

    #[error("Unexpected reply to '{origin}': {reply:?}")]
    UnexpectedReply { origin: String, reply: String },
}

impl CommFailure {
    /// Short machine-readable reason, used for diagnostics.
    pub fn reason(&self) -> &str {
        match self {
            CommFailure::SerialPort(_) => "SerialPort",
            CommFailure::Io(_) => "Io",
            CommFailure::Timeout { .. } => "Timeout",
            CommFailure::Utf8(_) => "Utf8",
            CommFailure::Device { reason, .. } => reason,
            CommFailure::UnexpectedReply { .. } => "UnexpectedReply",
        }
    }
}

/// Read/write access to the named attributes of one remote device.
pub trait AttributeChannel: Send {
    /// Read the current value of `name` as the device encodes it.
    fn read_attribute(&mut self, name: &str) -> Result<String, CommFailure>;

    /// Write `value` to `name`.
    fn write_attribute(&mut self, name: &str, value: &str) -> Result<(), CommFailure>;
}

impl<C: AttributeChannel + ?Sized> AttributeChannel for Box<C> {
    fn read_attribute(&mut self, name: &str) -> Result<String, CommFailure> {
        (**self).read_attribute(name)
    }

    fn write_attribute(&mut self, name: &str, value: &str) -> Result<(), CommFailure> {
        (**self).write_attribute(name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_attribute_names() {
        assert_eq!(names::current(1), "CurrentCh1");
        assert_eq!(names::current(4), "CurrentCh4");
    }

    #[test]
    fn test_device_reason_passthrough() {
        let failure = CommFailure::Device {
            reason: "API_AttrNotAllowed".to_string(),
            description: "not allowed while acquiring".to_string(),
            origin: "AcqTime 500".to_string(),
        };
        assert_eq!(failure.reason(), "API_AttrNotAllowed");
        assert!(failure.to_string().contains("AcqTime 500"));
    }
}
