use crate::attribute_channel::CommFailure;
use crate::config::ControllerConfig;
use crate::em_terminal::EmTerminal;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::thread;

/// Where the electrometer's attribute server lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAddress {
    /// `host:port` or `tcp://host:port`.
    Tcp(String),
    /// `serial:<path>`, or a bare `/dev/...` / `COMn` device path.
    Serial(String),
}

impl FromStr for DeviceAddress {
    type Err = EmConnectorError;

    fn from_str(address: &str) -> Result<Self, Self::Err> {
        let address = address.trim();
        if address.is_empty() {
            return Err(EmConnectorError::InvalidAddress {
                address: address.to_string(),
            });
        }

        if let Some(host) = address.strip_prefix("tcp://") {
            return Ok(Self::Tcp(host.to_string()));
        }
        if let Some(path) = address.strip_prefix("serial:") {
            return Ok(Self::Serial(path.trim_start_matches("//").to_string()));
        }
        if address.starts_with('/') || is_com_port(address) {
            return Ok(Self::Serial(address.to_string()));
        }
        if address.contains(':') {
            return Ok(Self::Tcp(address.to_string()));
        }

        Err(EmConnectorError::InvalidAddress {
            address: address.to_string(),
        })
    }
}

fn is_com_port(address: &str) -> bool {
    match (address.get(..3), address.get(3..)) {
        (Some(prefix), Some(number)) => {
            prefix.eq_ignore_ascii_case("COM")
                && !number.is_empty()
                && number.chars().all(|c| c.is_ascii_digit())
        }
        _ => false,
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceAddress::Tcp(host) => write!(f, "tcp://{}", host),
            DeviceAddress::Serial(path) => write!(f, "serial:{}", path),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmConnectorError {
    #[error("'{address}' is neither host:port nor a serial device path")]
    InvalidAddress { address: String },

    #[error("Electrometer at {address} unreachable: {source}")]
    DeviceUnreachable {
        address: String,
        #[source]
        source: CommFailure,
    },
}

pub struct EmConnector;

impl EmConnector {
    /// Open a session to the electrometer named in `config` and make sure it answers.
    pub fn connect(config: &ControllerConfig) -> Result<EmTerminal, EmConnectorError> {
        let address: DeviceAddress = config.device_address.parse()?;
        log::debug!("Connecting to electrometer at {}", address);

        let attempts = config.connect_attempts.max(1);
        let mut attempt = 1;
        loop {
            let mut terminal = Self::open(&address, config).map_err(|source| {
                EmConnectorError::DeviceUnreachable {
                    address: address.to_string(),
                    source,
                }
            })?;

            match terminal.initialize() {
                Ok(()) => break Ok(terminal),
                Err(CommFailure::Timeout { .. }) if attempt < attempts => {
                    log::debug!(
                        "Timeout probing {} (attempt {}/{}), retrying",
                        address,
                        attempt,
                        attempts
                    );
                    attempt += 1;
                    thread::sleep(config.retry_delay());
                }
                Err(source) => {
                    break Err(EmConnectorError::DeviceUnreachable {
                        address: address.to_string(),
                        source,
                    })
                }
            }
        }
    }

    fn open(address: &DeviceAddress, config: &ControllerConfig) -> Result<EmTerminal, CommFailure> {
        match address {
            DeviceAddress::Serial(path) => EmTerminal::open_serial(
                path,
                config.baud_rate,
                &config.terminator,
                config.io_timeout(),
            ),
            DeviceAddress::Tcp(host) => {
                let socket = Self::resolve(host)?;
                EmTerminal::open_tcp(&socket, &config.terminator, config.io_timeout())
            }
        }
    }

    fn resolve(host: &str) -> Result<SocketAddr, CommFailure> {
        host.to_socket_addrs()?.next().ok_or_else(|| {
            CommFailure::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no address found for {}", host),
            ))
        })
    }
}
