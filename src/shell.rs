//! The interactive command shell.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::console::{Input, LineSource};
use crate::link;
use crate::sequence::SequenceSource;
use crate::{terminate, Command, ShellError};

/// Character position in a stripped `*STB?` reply that carries the status byte.
pub const STATUS_INDEX: usize = 7;

pub const PROMPT: &str = "Enter a command: ";

/// Whether the loop should keep going after a command.
#[derive(Debug, PartialEq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Owns the link to the multiplexer for the whole session.
///
/// The link is released exactly once: by [`Shell::close`], or by drop if a
/// fatal error unwinds past the shell.
pub struct Shell<L: Read + Write, S: SequenceSource> {
    link: L,
    sequence: S,
    response_timeout: Option<Duration>,
    interrupt: Arc<AtomicBool>,
}

impl<L: Read + Write, S: SequenceSource> Shell<L, S> {
    pub fn new(link: L, sequence: S) -> Self {
        Self {
            link,
            sequence,
            response_timeout: None,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shares the flag raised by the Ctrl-C handler.
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Prompts until `exit`, Ctrl-C or end of input, then closes the link.
    pub fn run<I: LineSource, W: Write>(mut self, input: &mut I, out: &mut W) -> Result<(), ShellError> {
        loop {
            write!(out, "{}", PROMPT)?;
            out.flush()?;

            let line = match input.read_line()? {
                Input::Line(line) if !self.interrupted() => line,
                Input::Line(_) | Input::Interrupted => {
                    report_interrupt(out)?;
                    break;
                }
                Input::Closed => {
                    warn!("Input closed");
                    break;
                }
            };

            match self.execute(&line, out) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => break,
                Err(ShellError::Interrupted) => {
                    report_interrupt(out)?;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        self.close();
        Ok(())
    }

    /// Runs one operator line against the device and prints the result.
    pub fn execute<W: Write>(&mut self, input: &str, out: &mut W) -> Result<Flow, ShellError> {
        let line = terminate(input);
        match Command::classify(&line) {
            Command::Exit => return Ok(Flow::Exit),
            Command::LoadSequence(text) => {
                let chunks = self.sequence.pack()?;
                self.send(text.as_bytes())?;
                for chunk in &chunks {
                    self.send(chunk)?;
                }
                let response = self.receive()?;
                writeln!(out, "{}", response.escape_ascii())?;
            }
            Command::StatusQuery(text) => {
                self.send(text.as_bytes())?;
                let response = self.receive()?;
                writeln!(out, "{}", status_bits(&response)?)?;
            }
            Command::Generic(text) => {
                self.send(text.as_bytes())?;
                let response = self.receive()?;
                writeln!(out, "{}", String::from_utf8_lossy(&response).trim())?;
            }
        }
        Ok(Flow::Continue)
    }

    /// Releases the link.
    pub fn close(self) {
        info!("Closing serial link");
        drop(self.link);
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        debug!("tx {} bytes", bytes.len());
        self.link.write_all(bytes)?;
        self.link.flush()
    }

    fn receive(&mut self) -> Result<Vec<u8>, ShellError> {
        link::read_line(&mut self.link, self.response_timeout, &self.interrupt)
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }
}

fn report_interrupt<W: Write>(out: &mut W) -> io::Result<()> {
    warn!("Interrupted by operator");
    writeln!(out, "Exiting")
}

/// Renders the status character of a `*STB?` reply as binary digits.
pub fn status_bits(response: &[u8]) -> Result<String, ShellError> {
    let text = std::str::from_utf8(response).map_err(ShellError::MalformedStatus)?;
    let stripped = text.trim();
    match stripped.chars().nth(STATUS_INDEX) {
        Some(c) => Ok(format!("{:08b}", c as u32)),
        None => Err(ShellError::ShortStatus { response: stripped.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::SequenceError;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    // Observable side of the mock link, shared with the test.
    #[derive(Debug, Default)]
    struct Wire {
        writes: Vec<Vec<u8>>,
        reads: usize,
        drops: usize,
    }

    // Serial link stand-in: records each write, replays canned response lines.
    // Once out of responses it reports end of stream, or, when `stall` is set,
    // times out forever after raising the given flag.
    struct MockLink {
        wire: Rc<RefCell<Wire>>,
        responses: VecDeque<Vec<u8>>,
        pending: VecDeque<u8>,
        stall: Option<Arc<AtomicBool>>,
    }

    impl MockLink {
        fn new(responses: &[&[u8]]) -> (Self, Rc<RefCell<Wire>>) {
            let wire = Rc::new(RefCell::new(Wire::default()));
            let link = Self {
                wire: Rc::clone(&wire),
                responses: responses.iter().map(|r| r.to_vec()).collect(),
                pending: VecDeque::new(),
                stall: None,
            };
            (link, wire)
        }

        fn stalling(mut self, raise: Arc<AtomicBool>) -> Self {
            self.stall = Some(raise);
            self
        }
    }

    impl Read for MockLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pending.is_empty() {
                match self.responses.pop_front() {
                    Some(line) => {
                        self.wire.borrow_mut().reads += 1;
                        self.pending.extend(line);
                    }
                    None => {
                        return match &self.stall {
                            Some(raise) => {
                                raise.store(true, Ordering::SeqCst);
                                Err(io::Error::new(io::ErrorKind::TimedOut, "no reply"))
                            }
                            None => Ok(0),
                        };
                    }
                }
            }
            let mut n = 0;
            while n < buf.len() {
                match self.pending.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }
    }

    impl Write for MockLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.wire.borrow_mut().writes.push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for MockLink {
        fn drop(&mut self) {
            self.wire.borrow_mut().drops += 1;
        }
    }

    struct StubSequence(Vec<Vec<u8>>);

    impl SequenceSource for StubSequence {
        fn pack(&self) -> Result<Vec<Vec<u8>>, SequenceError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenSequence;

    impl SequenceSource for BrokenSequence {
        fn pack(&self) -> Result<Vec<Vec<u8>>, SequenceError> {
            Err(SequenceError::Empty)
        }
    }

    struct Script(VecDeque<Input>);

    impl Script {
        fn new(inputs: Vec<Input>) -> Self {
            Script(inputs.into())
        }
    }

    impl LineSource for Script {
        fn read_line(&mut self) -> io::Result<Input> {
            Ok(self.0.pop_front().unwrap_or(Input::Closed))
        }
    }

    fn line(text: &str) -> Input {
        Input::Line(text.to_string())
    }

    fn no_sequence() -> StubSequence {
        StubSequence(Vec::new())
    }

    #[test]
    fn generic_command_prints_stripped_response() {
        let (link, wire) = MockLink::new(&[b"  MX-8 v1.2 \r\n"]);
        let mut shell = Shell::new(link, no_sequence());
        let mut out = Vec::new();

        assert_eq!(shell.execute("*IDN?", &mut out).unwrap(), Flow::Continue);

        assert_eq!(String::from_utf8(out).unwrap(), "MX-8 v1.2\n");
        let wire = wire.borrow();
        assert_eq!(wire.writes, vec![b"*IDN?\r\n".to_vec()]);
        assert_eq!(wire.reads, 1);
    }

    #[test]
    fn exit_performs_no_io() {
        let (link, wire) = MockLink::new(&[b"unused\r\n"]);
        let mut shell = Shell::new(link, no_sequence());
        let mut out = Vec::new();

        assert_eq!(shell.execute("exit", &mut out).unwrap(), Flow::Exit);
        assert!(out.is_empty());
        assert!(wire.borrow().writes.is_empty());
        assert_eq!(wire.borrow().reads, 0);
    }

    #[test]
    fn load_sequence_streams_chunks_after_header() {
        let (link, wire) = MockLink::new(&[b"SEQ OK\r\n"]);
        let chunks = vec![vec![1, 2], vec![3], vec![4, 5, 6]];
        let mut shell = Shell::new(link, StubSequence(chunks));
        let mut out = Vec::new();

        shell.execute("LDSEQ 3", &mut out).unwrap();

        let wire = wire.borrow();
        assert_eq!(
            wire.writes,
            vec![b"LDSEQ 3\r\n".to_vec(), vec![1, 2], vec![3], vec![4, 5, 6]]
        );
        assert_eq!(wire.reads, 1);
        assert_eq!(String::from_utf8(out).unwrap(), "SEQ OK\\r\\n\n");
    }

    #[test]
    fn load_sequence_failure_sends_nothing() {
        let (link, wire) = MockLink::new(&[]);
        let mut shell = Shell::new(link, BrokenSequence);
        let mut out = Vec::new();

        let result = shell.execute("LDSEQ 1", &mut out);
        assert!(matches!(result, Err(ShellError::Sequence(SequenceError::Empty))));
        assert!(wire.borrow().writes.is_empty());
    }

    #[test]
    fn status_query_prints_binary() {
        let (link, _wire) = MockLink::new(&[b" #STB 00A\r\n"]);
        let mut shell = Shell::new(link, no_sequence());
        let mut out = Vec::new();

        shell.execute("*STB?", &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "01000001\n");
    }

    #[test]
    fn short_status_reply_is_fatal() {
        let (link, _wire) = MockLink::new(&[b"#STB\r\n"]);
        let mut shell = Shell::new(link, no_sequence());
        let mut out = Vec::new();

        let result = shell.execute("*STB?", &mut out);
        assert!(matches!(result, Err(ShellError::ShortStatus { .. })));
    }

    #[test]
    fn status_reply_with_invalid_utf8_is_fatal() {
        let (link, _wire) = MockLink::new(&[b"0123456\xff\r\n"]);
        let mut shell = Shell::new(link, no_sequence());
        let mut out = Vec::new();

        let result = shell.execute("*STB?", &mut out);
        assert!(matches!(result, Err(ShellError::MalformedStatus(_))));
        assert!(out.is_empty());
        assert!(matches!(status_bits(b"\xc3"), Err(ShellError::MalformedStatus(_))));
    }

    #[test]
    fn status_bits_pads_to_eight_digits() {
        assert_eq!(status_bits(b"0123456\x05\r\n").unwrap(), "00000101");
        assert_eq!(status_bits(b"abcdefgA").unwrap(), "01000001");
    }

    #[test]
    fn repeated_command_prints_identical_output() {
        let (link, _wire) = MockLink::new(&[b"RUNNING\r\n", b"RUNNING\r\n"]);
        let mut shell = Shell::new(link, no_sequence());
        let mut first = Vec::new();
        let mut second = Vec::new();

        shell.execute("STAT", &mut first).unwrap();
        shell.execute("STAT", &mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn run_until_exit_releases_link_once() {
        let (link, wire) = MockLink::new(&[b"OK\r\n"]);
        let shell = Shell::new(link, no_sequence());
        let mut input = Script::new(vec![line("START"), line("exit"), line("STOP")]);
        let mut out = Vec::new();

        shell.run(&mut input, &mut out).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), format!("{p}OK\n{p}", p = PROMPT));
        let wire = wire.borrow();
        assert_eq!(wire.writes, vec![b"START\r\n".to_vec()]);
        assert_eq!(wire.drops, 1);
    }

    #[test]
    fn interrupt_stops_without_further_io() {
        let (link, wire) = MockLink::new(&[b"never read\r\n"]);
        let shell = Shell::new(link, no_sequence());
        let mut input = Script::new(vec![Input::Interrupted, line("STAT")]);
        let mut out = Vec::new();

        shell.run(&mut input, &mut out).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), format!("{}Exiting\n", PROMPT));
        let wire = wire.borrow();
        assert!(wire.writes.is_empty());
        assert_eq!(wire.reads, 0);
        assert_eq!(wire.drops, 1);
    }

    #[test]
    fn interrupt_while_waiting_for_reply_exits_cleanly() {
        let interrupt = Arc::new(AtomicBool::new(false));
        let (link, wire) = MockLink::new(&[]);
        let link = link.stalling(Arc::clone(&interrupt));
        let shell = Shell::new(link, no_sequence()).with_interrupt(interrupt);
        let mut input = Script::new(vec![line("STAT"), line("STOP")]);
        let mut out = Vec::new();

        shell.run(&mut input, &mut out).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), format!("{}Exiting\n", PROMPT));
        let wire = wire.borrow();
        assert_eq!(wire.writes, vec![b"STAT\r\n".to_vec()]);
        assert_eq!(wire.drops, 1);
    }

    #[test]
    fn interrupt_raised_before_line_arrives_sends_nothing() {
        let (link, wire) = MockLink::new(&[b"never read\r\n"]);
        let shell = Shell::new(link, no_sequence()).with_interrupt(Arc::new(AtomicBool::new(true)));
        let mut out = Vec::new();

        shell.run(&mut Script::new(vec![line("STAT")]), &mut out).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), format!("{}Exiting\n", PROMPT));
        assert!(wire.borrow().writes.is_empty());
        assert_eq!(wire.borrow().drops, 1);
    }

    #[test]
    fn closed_input_ends_session() {
        let (link, wire) = MockLink::new(&[]);
        let shell = Shell::new(link, no_sequence());
        let mut out = Vec::new();

        shell.run(&mut Script::new(Vec::new()), &mut out).unwrap();
        assert_eq!(wire.borrow().drops, 1);
    }

    #[test]
    fn fatal_error_still_releases_link() {
        let (link, wire) = MockLink::new(&[]);
        let shell = Shell::new(link, no_sequence());
        let mut out = Vec::new();

        let result = shell.run(&mut Script::new(vec![line("STAT")]), &mut out);
        assert!(matches!(result, Err(ShellError::LinkClosed)));
        assert_eq!(wire.borrow().drops, 1);
    }
}
