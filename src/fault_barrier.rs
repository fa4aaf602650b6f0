//! Containment of device faults.
//!
//! The scan engine may survive one bad read but not an error thrown out of the
//! controller. Every device operation therefore runs through [`FaultBarrier::guard`], which
//! logs device faults and hands them back as [`Outcome::Reported`]. Errors that indicate
//! a programming or configuration mistake are logged and still returned as `Err`.

use crate::attribute_channel::CommFailure;
use crate::sequencer::AcquisitionError;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// A request to the device failed or was refused.
    Communication,
    /// No session to the device.
    Unreachable,
    /// The device answered, but not in a way the controller can use.
    Unexpected,
    /// Misuse or an impossible device state; never contained.
    Fatal,
}

impl FaultKind {
    pub fn of(err: &AcquisitionError) -> Self {
        match err {
            AcquisitionError::Comm(_) => FaultKind::Communication,
            AcquisitionError::NotConnected | AcquisitionError::Unreachable(_) => {
                FaultKind::Unreachable
            }
            AcquisitionError::Timeout { .. }
            | AcquisitionError::Malformed(_)
            | AcquisitionError::UnexpectedValue { .. } => FaultKind::Unexpected,
            AcquisitionError::UnmappedState { .. }
            | AcquisitionError::Registry(_)
            | AcquisitionError::InvalidIntegrationTime(_)
            | AcquisitionError::InvalidTriggerCount(_) => FaultKind::Fatal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::Communication => "communication failure",
            FaultKind::Unreachable => "device unreachable",
            FaultKind::Unexpected => "unexpected failure",
            FaultKind::Fatal => "fatal error",
        }
    }
}

/// What went wrong, where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub operation: String,
    pub kind: FaultKind,
    pub reason: String,
    pub description: String,
    pub origin: String,
}

impl Diagnostic {
    pub fn new(operation: &str, err: &AcquisitionError) -> Self {
        let kind = FaultKind::of(err);
        match err {
            AcquisitionError::Comm(CommFailure::Device {
                reason,
                description,
                origin,
            }) => Self {
                operation: operation.to_string(),
                kind,
                reason: reason.clone(),
                description: description.clone(),
                origin: origin.clone(),
            },
            AcquisitionError::Comm(failure) => Self {
                operation: operation.to_string(),
                kind,
                reason: failure.reason().to_string(),
                description: failure.to_string(),
                origin: operation.to_string(),
            },
            other => Self {
                operation: operation.to_string(),
                kind,
                reason: variant_name(other).to_string(),
                description: error_chain(other),
                origin: operation.to_string(),
            },
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in {}: reason: {}, description: {}, origin: {}",
            self.kind.as_str(),
            self.operation,
            self.reason,
            self.description,
            self.origin
        )
    }
}

fn variant_name(err: &AcquisitionError) -> &'static str {
    match err {
        AcquisitionError::Comm(_) => "Comm",
        AcquisitionError::NotConnected => "NotConnected",
        AcquisitionError::Unreachable(_) => "DeviceUnreachable",
        AcquisitionError::Timeout { .. } => "Timeout",
        AcquisitionError::Malformed(_) => "MalformedPayload",
        AcquisitionError::UnexpectedValue { .. } => "UnexpectedValue",
        AcquisitionError::UnmappedState { .. } => "UnmappedState",
        AcquisitionError::Registry(_) => "Registry",
        AcquisitionError::InvalidIntegrationTime(_) => "InvalidIntegrationTime",
        AcquisitionError::InvalidTriggerCount(_) => "InvalidTriggerCount",
    }
}

/// `err` followed by each of its sources.
fn error_chain(err: &dyn Error) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

/// Result of a guarded device operation.
#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Done(T),
    /// The operation failed; the fault was logged and contained.
    Reported(Diagnostic),
}

impl<T> Outcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    pub fn is_reported(&self) -> bool {
        matches!(self, Outcome::Reported(_))
    }

    pub fn done(self) -> Option<T> {
        match self {
            Outcome::Done(value) => Some(value),
            Outcome::Reported(_) => None,
        }
    }

    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Outcome::Done(_) => None,
            Outcome::Reported(diagnostic) => Some(diagnostic),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Done(value) => Outcome::Done(f(value)),
            Outcome::Reported(diagnostic) => Outcome::Reported(diagnostic),
        }
    }
}

/// Keeps count of the faults it contained.
#[derive(Debug, Default)]
pub struct FaultBarrier {
    reported: u64,
    last: Option<Diagnostic>,
}

impl FaultBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation`, containing device faults.
    pub fn guard<T>(
        &mut self,
        operation: &str,
        f: impl FnOnce() -> Result<T, AcquisitionError>,
    ) -> Result<Outcome<T>, AcquisitionError> {
        let err = match f() {
            Ok(value) => return Ok(Outcome::Done(value)),
            Err(err) => err,
        };

        let diagnostic = Diagnostic::new(operation, &err);
        match diagnostic.kind {
            FaultKind::Fatal => {
                log::error!("{}", diagnostic);
                return Err(err);
            }
            FaultKind::Communication | FaultKind::Unreachable => log::warn!("{}", diagnostic),
            FaultKind::Unexpected => log::error!("{} ({:?})", diagnostic, err),
        }

        self.reported += 1;
        self.last = Some(diagnostic.clone());
        Ok(Outcome::Reported(diagnostic))
    }

    pub fn reported(&self) -> u64 {
        self.reported
    }

    pub fn last(&self) -> Option<&Diagnostic> {
        self.last.as_ref()
    }
}
