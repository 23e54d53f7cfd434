//! Sequence files for the `LDSEQ` command.
//!
//! A sequence file lists channel switching steps, one per line, in the same
//! vocabulary as the `ENA` command:
//!
//! ```text
//! # slot channel state duration_ms
//! SL1 CH3 ON  500
//! SL1 CH3 OFF 250
//! ```
//!
//! Each step packs into a 7-byte chunk: slot, channel, state (1 = ON,
//! 0 = OFF) and the duration as a big-endian `u32`.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// File the `LDSEQ` command loads unless told otherwise.
pub const DEFAULT_FILE: &str = "Sequence.txt";

/// Size in bytes of one packed step.
pub const CHUNK_LEN: usize = 7;

#[derive(Debug)]
pub enum SequenceError {
    /// The file could not be read.
    Io(io::Error),
    /// A line did not describe a valid step. `line` is 1-based.
    Parse { line: usize, field: Field, text: String },
    /// The file contained no steps.
    Empty,
}

/// Position of a field within a step line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field {
    Slot,
    Channel,
    State,
    Duration,
    /// Extra text after the duration.
    Trailing,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Slot => "slot (SL<n>)",
            Field::Channel => "channel (CH<n>)",
            Field::State => "state (ON|OFF)",
            Field::Duration => "duration in ms",
            Field::Trailing => "end of line",
        };
        f.write_str(name)
    }
}

impl fmt::Display for SequenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceError::Io(e) => write!(f, "{}", e),
            SequenceError::Parse { line, field, text } => {
                write!(f, "line {}: expected {}, found '{}'", line, field, text)
            }
            SequenceError::Empty => write!(f, "sequence file has no steps"),
        }
    }
}

impl std::error::Error for SequenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SequenceError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SequenceError {
    fn from(e: io::Error) -> Self {
        SequenceError::Io(e)
    }
}

/// One switching step of a sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub slot: u8,
    pub channel: u8,
    pub on: bool,
    pub duration_ms: u32,
}

impl Step {
    pub fn pack(&self) -> [u8; CHUNK_LEN] {
        let d = self.duration_ms.to_be_bytes();
        [self.slot, self.channel, self.on as u8, d[0], d[1], d[2], d[3]]
    }
}

/// Produces the ordered chunks that follow an `LDSEQ` header.
pub trait SequenceSource {
    fn pack(&self) -> Result<Vec<Vec<u8>>, SequenceError>;
}

/// Sequence read from a file on disk each time it is packed.
#[derive(Debug, Clone)]
pub struct SequenceFile {
    path: PathBuf,
}

impl SequenceFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SequenceSource for SequenceFile {
    fn pack(&self) -> Result<Vec<Vec<u8>>, SequenceError> {
        let text = fs::read_to_string(&self.path)?;
        let steps = parse(&text)?;
        log::debug!("Packed {} steps from {}", steps.len(), self.path().display());
        Ok(steps.iter().map(|step| step.pack().to_vec()).collect())
    }
}

/// Parses every step in a sequence file's text.
pub fn parse(text: &str) -> Result<Vec<Step>, SequenceError> {
    let mut steps = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let content = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        if content.trim().is_empty() {
            continue;
        }
        steps.push(parse_step(content, index + 1)?);
    }

    if steps.is_empty() {
        return Err(SequenceError::Empty);
    }
    Ok(steps)
}

fn parse_step(content: &str, line: usize) -> Result<Step, SequenceError> {
    let mut fields = content.split_whitespace();
    let fail = |field: Field, text: Option<&str>| SequenceError::Parse {
        line,
        field,
        text: text.unwrap_or("").to_string(),
    };

    let slot_text = fields.next();
    let slot = slot_text
        .and_then(|s| prefixed_number(s, "SL"))
        .ok_or_else(|| fail(Field::Slot, slot_text))?;

    let channel_text = fields.next();
    let channel = channel_text
        .and_then(|s| prefixed_number(s, "CH"))
        .ok_or_else(|| fail(Field::Channel, channel_text))?;

    let state_text = fields.next();
    let on = match state_text {
        Some(s) if s.eq_ignore_ascii_case("ON") => true,
        Some(s) if s.eq_ignore_ascii_case("OFF") => false,
        other => return Err(fail(Field::State, other)),
    };

    let duration_text = fields.next();
    let duration_ms = duration_text
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| fail(Field::Duration, duration_text))?;

    if let Some(extra) = fields.next() {
        return Err(fail(Field::Trailing, Some(extra)));
    }

    Ok(Step { slot, channel, on, duration_ms })
}

// "SL3" -> 3, prefix matched case-insensitively.
fn prefixed_number(token: &str, prefix: &str) -> Option<u8> {
    let head = token.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    token[prefix.len()..].parse().ok()
}
