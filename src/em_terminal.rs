use crate::attribute_channel::{names, AttributeChannel, CommFailure};
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

/// Poll granularity of the underlying byte stream.
const READ_SLICE: Duration = Duration::from_millis(10);

/// Write acknowledgement of the attribute server.
const ACK: &str = "OK";

/// Byte stream the terminal talks over.
pub trait Transport: Read + Write + Send {
    /// Drop anything the device sent that nobody asked for. Returns the number of bytes
    /// discarded.
    fn clear_input(&mut self) -> Result<usize, CommFailure> {
        Ok(0)
    }
}

impl Transport for Box<dyn SerialPort> {
    fn clear_input(&mut self) -> Result<usize, CommFailure> {
        let pending = self.bytes_to_read()?;
        self.clear(serialport::ClearBuffer::All)?;
        Ok(pending as usize)
    }
}

impl Transport for TcpStream {
    fn clear_input(&mut self) -> Result<usize, CommFailure> {
        self.set_nonblocking(true)?;
        let drained = drain(self);
        self.set_nonblocking(false)?;
        drained
    }
}

/// Read and discard until the stream has nothing more to give.
fn drain(stream: &mut impl Read) -> Result<usize, CommFailure> {
    let mut buf = [0u8; 256];
    let mut total = 0;
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => total += n,
            Err(e) => match e.kind() {
                ErrorKind::WouldBlock | ErrorKind::TimedOut => return Ok(total),
                ErrorKind::Interrupted => {}
                _ => return Err(e.into()),
            },
        }
    }
}

/// Line-oriented request/response session with the electrometer's attribute server.
///
/// Requests are single lines. A read is `<name>?` and is answered with the value, a write
/// is `<name> <value>` and is answered with `OK`. Refusals come back as
/// `ERR <reason>: <description>`. Every reply ends with the configured terminator.
///
/// Replies carry no request id. After a timeout the late reply is discarded when it shows
/// up before the next request, and a late `OK` arriving in front of a read's value is
/// skipped.
pub struct EmTerminal {
    transport: Box<dyn Transport>,
    terminator: String,
    timeout: Duration,
    /// Requests that timed out and may still be answered.
    unanswered: usize,
}

impl std::fmt::Debug for EmTerminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmTerminal")
            .field("terminator", &self.terminator)
            .field("timeout", &self.timeout)
            .field("unanswered", &self.unanswered)
            .finish_non_exhaustive()
    }
}

impl EmTerminal {
    /// Wrap an already opened transport.
    pub fn new(
        transport: Box<dyn Transport>,
        terminator: &str,
        timeout: Duration,
    ) -> Result<Self, CommFailure> {
        let mut terminal = Self {
            transport,
            terminator: terminator.to_string(),
            timeout,
            unanswered: 0,
        };

        terminal.flush()?;
        Ok(terminal)
    }

    /// Open a serial line to the electrometer.
    pub fn open_serial(
        path: &str,
        baud_rate: u32,
        terminator: &str,
        timeout: Duration,
    ) -> Result<Self, CommFailure> {
        log::debug!("Opening serial port {} at {} baud", path, baud_rate);
        let serial = serialport::new(path, baud_rate).timeout(READ_SLICE).open()?;
        Self::new(Box::new(serial), terminator, timeout)
    }

    /// Open a TCP session to the electrometer's attribute server.
    pub fn open_tcp(
        addr: &SocketAddr,
        terminator: &str,
        timeout: Duration,
    ) -> Result<Self, CommFailure> {
        log::debug!("Opening TCP session to {}", addr);
        let stream = TcpStream::connect_timeout(addr, timeout)?;
        stream.set_read_timeout(Some(READ_SLICE))?;
        stream.set_nodelay(true)?;
        Self::new(Box::new(stream), terminator, timeout)
    }

    /// Check that the device answers at all.
    pub fn initialize(&mut self) -> Result<(), CommFailure> {
        log::debug!("Probing attribute server with {}", names::ACQ_STATE);
        let state = self.read_attribute(names::ACQ_STATE)?;
        log::debug!("Device answered with state {}", state);
        self.flush()
    }

    fn flush(&mut self) -> Result<(), CommFailure> {
        let discarded = self.transport.clear_input()?;
        if discarded > 0 {
            log::debug!("Discarded {} stale bytes", discarded);
            self.unanswered = 0;
        }
        Ok(())
    }

    /// Send one request line and collect the reply up to the terminator.
    pub fn exec(&mut self, command: &str) -> Result<String, CommFailure> {
        self.flush()?;

        let command_with_newline = format!("{}\n", command);
        self.transport.write_all(command_with_newline.as_bytes())?;
        self.transport.flush()?;

        self.read_reply()
    }

    fn read_reply(&mut self) -> Result<String, CommFailure> {
        let mut response = Vec::new();
        let terminator_bytes = self.terminator.clone().into_bytes();
        let now = Instant::now();

        loop {
            if now.elapsed() >= self.timeout {
                let tail_start = response.len().saturating_sub(2);
                let actual = String::from_utf8_lossy(&response[tail_start..]).to_string();
                self.unanswered += 1;
                // Whatever is already in flight belongs to the request that just failed.
                self.transport.clear_input()?;
                return Err(CommFailure::Timeout {
                    expected: self.terminator.clone(),
                    actual,
                });
            }

            let mut byte = [0u8; 1];
            match self.transport.read_exact(&mut byte) {
                Ok(()) => {
                    response.push(byte[0]);
                    if response.ends_with(&terminator_bytes) {
                        break;
                    }
                }
                Err(e) => match e.kind() {
                    ErrorKind::WouldBlock
                    | ErrorKind::TimedOut
                    | ErrorKind::Interrupted
                    | ErrorKind::UnexpectedEof => {}
                    _ => return Err(e.into()),
                },
            }
        }

        let response_without_terminator = &response[..response.len() - terminator_bytes.len()];
        let response_str = String::from_utf8(response_without_terminator.to_vec())?;

        Ok(response_str.trim().to_string())
    }
}

/// Turn an `ERR <reason>: <description>` reply into a [`CommFailure::Device`].
fn check_refusal(origin: &str, reply: String) -> Result<String, CommFailure> {
    let Some(rest) = reply.strip_prefix("ERR") else {
        return Ok(reply);
    };

    let rest = rest.trim();
    let (reason, description) = match rest.split_once(':') {
        Some((reason, description)) => (reason.trim(), description.trim()),
        None => (rest, ""),
    };

    Err(CommFailure::Device {
        reason: reason.to_string(),
        description: description.to_string(),
        origin: origin.to_string(),
    })
}

impl AttributeChannel for EmTerminal {
    fn read_attribute(&mut self, name: &str) -> Result<String, CommFailure> {
        let command = format!("{}?", name);
        let mut reply = self.exec(&command)?;
        while reply == ACK && self.unanswered > 0 {
            log::debug!("Skipping late acknowledgement in front of {}", command);
            self.unanswered -= 1;
            reply = self.read_reply()?;
        }
        check_refusal(&command, reply)
    }

    fn write_attribute(&mut self, name: &str, value: &str) -> Result<(), CommFailure> {
        let command = format!("{} {}", name, value);
        let reply = self.exec(&command)?;
        let reply = check_refusal(&command, reply)?;

        if reply == ACK {
            Ok(())
        } else {
            Err(CommFailure::UnexpectedReply {
                origin: command,
                reply,
            })
        }
    }
}
