//! Serial link setup and line-oriented reads.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::ShellError;

/// How long a single port read blocks before the line reader polls again.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_SETTLE_MS: u64 = 2000;

/// Parameters for opening the link to the multiplexer.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Pause after opening so the board can finish its reset.
    pub settle: Duration,
    /// Upper bound for one response line. `None` waits indefinitely.
    pub response_timeout: Option<Duration>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: String::from(DEFAULT_PORT),
            baud_rate: DEFAULT_BAUD_RATE,
            settle: Duration::from_millis(DEFAULT_SETTLE_MS),
            response_timeout: None,
        }
    }
}

/// Opens the port 8N1, waits for the board to boot and drops stale data.
pub fn open(config: &LinkConfig) -> Result<Box<dyn SerialPort>, ShellError> {
    let port = serialport::new(config.port.as_str(), config.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(POLL_INTERVAL)
        .open()?;
    info!("Opened {} at {} baud", config.port, config.baud_rate);

    thread::sleep(config.settle);
    port.clear(ClearBuffer::All)?;
    Ok(port)
}

/// Reads bytes up to and including the first `\n`.
///
/// Port read timeouts are treated as "nothing yet" unless `timeout` is set
/// and has elapsed. `interrupt` is checked on every idle poll. A zero-length
/// read means the other end went away.
pub fn read_line<R: Read + ?Sized>(
    reader: &mut R,
    timeout: Option<Duration>,
    interrupt: &AtomicBool,
) -> Result<Vec<u8>, ShellError> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Err(ShellError::LinkClosed),
            Ok(_) => {
                line.push(byte[0]);
                if byte[0] == b'\n' {
                    debug!("rx {:?}", String::from_utf8_lossy(&line));
                    return Ok(line);
                }
            }
            Err(ref e)
                if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) =>
            {
                if interrupt.load(Ordering::SeqCst) {
                    return Err(ShellError::Interrupted);
                }
            }
            Err(e) => return Err(ShellError::Io(e)),
        }

        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(ShellError::ResponseTimeout);
            }
        }
    }
}
