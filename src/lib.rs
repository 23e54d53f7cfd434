//! # Multiplexer Command Shell Library
//!
//! Host-side logic for talking to the channel multiplexer over a serial link.
//! Operator lines are classified into a [`Command`], forwarded to the device,
//! and the single response line is formatted for display. The `LDSEQ` command
//! additionally streams a packed sequence file after the command header.

use std::fmt;
use std::io;

pub mod console;
pub mod link;
pub mod sequence;
pub mod shell;

pub use console::{Input, LineSource};
pub use link::LinkConfig;
pub use sequence::{SequenceError, SequenceFile, SequenceSource};
pub use shell::{Flow, Shell};

/// Terminator appended to every operator line before it is sent.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Keywords shown to the operator at startup. Informational only.
pub const COMMAND_LIST: [&str; 25] = [
    "ENA SLx CHx ON|OFF",
    "STAT",
    "*IDN?",
    "*RST",
    "*CLS",
    "GTL",
    "REM",
    "TRG",
    "TIMER",
    "TIMER?",
    "ADDSEQ",
    "SEQ?",
    "NSEQ?",
    "DELSEQ",
    "START",
    "STOP",
    "RESUME",
    "PAUSE",
    "*STB?",
    "TRGPOL",
    "GRD",
    "LDSEQ <cnt>",
    "GTSEQ",
    "STSEQ",
    "RLSEQ",
];

/// Writes the startup banner listing the supported commands.
pub fn write_banner<W: io::Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "Command list: \n")?;
    for keyword in COMMAND_LIST {
        writeln!(out, "{}", keyword)?;
    }
    writeln!(out, "type <exit> to terminate the script")
}

// Errors that end a shell session.
#[derive(Debug)]
pub enum ShellError {
    /// Console or serial stream failure.
    Io(io::Error),
    /// The serial port could not be opened or configured.
    Serial(serialport::Error),
    /// The sequence file could not be packed for `LDSEQ`.
    Sequence(SequenceError),
    /// A `*STB?` reply had no character at the status position.
    ShortStatus { response: String },
    /// A `*STB?` reply was not valid UTF-8.
    MalformedStatus(std::str::Utf8Error),
    /// The device side of the link stopped producing data mid-line.
    LinkClosed,
    /// No complete response line arrived within the configured timeout.
    ResponseTimeout,
    /// The operator pressed Ctrl-C while a response was pending.
    Interrupted,
}

impl fmt::Display for ShellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellError::Io(e) => write!(f, "I/O error: {}", e),
            ShellError::Serial(e) => write!(f, "serial port error: {}", e),
            ShellError::Sequence(e) => write!(f, "cannot load sequence: {}", e),
            ShellError::ShortStatus { response } => write!(
                f,
                "status response '{}' is shorter than {} characters",
                response,
                shell::STATUS_INDEX + 1
            ),
            ShellError::MalformedStatus(e) => write!(f, "status response is not valid text: {}", e),
            ShellError::LinkClosed => write!(f, "serial link closed before a full line was read"),
            ShellError::ResponseTimeout => write!(f, "timed out waiting for a response line"),
            ShellError::Interrupted => write!(f, "interrupted while waiting for a response"),
        }
    }
}

impl std::error::Error for ShellError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShellError::Io(e) => Some(e),
            ShellError::Serial(e) => Some(e),
            ShellError::Sequence(e) => Some(e),
            ShellError::MalformedStatus(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ShellError {
    fn from(e: io::Error) -> Self {
        ShellError::Io(e)
    }
}

impl From<serialport::Error> for ShellError {
    fn from(e: serialport::Error) -> Self {
        ShellError::Serial(e)
    }
}

impl From<SequenceError> for ShellError {
    fn from(e: SequenceError) -> Self {
        ShellError::Sequence(e)
    }
}

/// An operator line, classified once by its literal prefix.
///
/// Every variant except `Exit` borrows the terminated line that goes out on
/// the wire unchanged.
#[derive(Debug, PartialEq)]
pub enum Command<'a> {
    Exit,
    LoadSequence(&'a str),
    StatusQuery(&'a str),
    Generic(&'a str),
}

impl<'a> Command<'a> {
    /// Classifies a line that already carries its `\r\n` terminator.
    pub fn classify(line: &'a str) -> Self {
        if line.starts_with("exit") {
            Command::Exit
        } else if line.starts_with("LDSEQ") {
            Command::LoadSequence(line)
        } else if line.starts_with("*STB?") {
            Command::StatusQuery(line)
        } else {
            Command::Generic(line)
        }
    }
}

/// Appends the line terminator the device expects.
pub fn terminate(input: &str) -> String {
    format!("{}{}", input, LINE_TERMINATOR)
}
