//! In-memory stand-in for the electrometer's attribute server.
//!
//! Clones share state, so a test keeps one handle to script the device and inspect the
//! recorded calls while the code under test owns another.

use crate::attribute_channel::{names, AttributeChannel, CommFailure};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Read(String),
    Write(String, String),
}

#[derive(Debug, Default)]
struct Inner {
    attributes: HashMap<String, String>,
    state_script: VecDeque<String>,
    failing: HashSet<String>,
    calls: Vec<Call>,
}

#[derive(Debug, Clone)]
pub struct MockDevice {
    inner: Arc<Mutex<Inner>>,
}

impl MockDevice {
    pub fn new() -> Self {
        let device = Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        };
        device.set(names::ACQ_STATE, "STATE_ON");
        device.set(names::STATUS, "Device is ready");
        device.set(names::TRIGGER_MODE, "0");
        device.set(names::TRIGGER_COUNT, "1");
        device.set(names::ACQ_TIME, "1000");
        device.set(names::MEASUREMENTS, "");
        for input in 1..=4 {
            device.set(&names::current(input), "[]");
        }
        device
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn set(&self, name: &str, value: &str) {
        self.lock()
            .attributes
            .insert(name.to_string(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.lock().attributes.get(name).cloned()
    }

    /// Successive `AcqState` reads return these values; the last one sticks.
    pub fn script_states(&self, states: &[&str]) {
        self.lock()
            .state_script
            .extend(states.iter().map(|s| s.to_string()));
    }

    /// Every access to `name` fails from now on.
    pub fn fail(&self, name: &str) {
        self.lock().failing.insert(name.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn reads_of(&self, name: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, Call::Read(n) if n == name))
            .count()
    }

    pub fn writes_to(&self, name: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Write(n, value) if n == name => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    /// Index of the first write to `name` in the call log.
    pub fn first_write_index(&self, name: &str) -> Option<usize> {
        self.lock()
            .calls
            .iter()
            .position(|call| matches!(call, Call::Write(n, _) if n == name))
    }

    /// Indices of all reads of `name` in the call log.
    pub fn read_indices(&self, name: &str) -> Vec<usize> {
        self.lock()
            .calls
            .iter()
            .enumerate()
            .filter(|(_, call)| matches!(call, Call::Read(n) if n == name))
            .map(|(index, _)| index)
            .collect()
    }

    fn refusal(name: &str, reason: &str) -> CommFailure {
        CommFailure::Device {
            reason: reason.to_string(),
            description: format!("mock refused {}", name),
            origin: name.to_string(),
        }
    }
}

impl AttributeChannel for MockDevice {
    fn read_attribute(&mut self, name: &str) -> Result<String, CommFailure> {
        let mut inner = self.lock();
        inner.calls.push(Call::Read(name.to_string()));

        if inner.failing.contains(name) {
            return Err(Self::refusal(name, "API_DeviceTimedOut"));
        }
        if name == names::ACQ_STATE {
            if let Some(next) = inner.state_script.pop_front() {
                inner.attributes.insert(name.to_string(), next);
            }
        }

        inner
            .attributes
            .get(name)
            .cloned()
            .ok_or_else(|| Self::refusal(name, "API_AttrNotFound"))
    }

    fn write_attribute(&mut self, name: &str, value: &str) -> Result<(), CommFailure> {
        let mut inner = self.lock();
        inner
            .calls
            .push(Call::Write(name.to_string(), value.to_string()));

        if inner.failing.contains(name) {
            return Err(Self::refusal(name, "API_DeviceTimedOut"));
        }
        if name == names::ACQ_STOP {
            inner
                .attributes
                .insert(names::ACQ_STATE.to_string(), "STATE_ON".to_string());
        }
        inner
            .attributes
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}
