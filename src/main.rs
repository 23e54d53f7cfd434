use anyhow::Context;
use clap::Parser;
use mx_shell::console::Console;
use mx_shell::{link, sequence, write_banner, LinkConfig, SequenceFile, Shell};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Command-line options. Every flag defaults to the bench setup.
#[derive(Debug, Parser)]
#[command(about = "Send commands to the channel multiplexer over a serial port")]
struct Cli {
    /// Serial device the multiplexer is attached to.
    #[arg(long, default_value = link::DEFAULT_PORT)]
    port: String,

    #[arg(long, default_value_t = link::DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Sequence file streamed by the LDSEQ command.
    #[arg(long, default_value = sequence::DEFAULT_FILE)]
    sequence: PathBuf,

    /// Time to wait for the board to reset after opening the port.
    #[arg(long, default_value_t = link::DEFAULT_SETTLE_MS)]
    settle_ms: u64,

    /// Give up on a response after this long. Waits forever when unset.
    #[arg(long)]
    response_timeout_ms: Option<u64>,
}

impl Cli {
    fn link_config(&self) -> LinkConfig {
        LinkConfig {
            port: self.port.clone(),
            baud_rate: self.baud,
            settle: Duration::from_millis(self.settle_ms),
            response_timeout: self.response_timeout_ms.map(Duration::from_millis),
        }
    }
}

// The main entry point for the multiplexer command shell.
fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = cli.link_config();

    let interrupt = Arc::new(AtomicBool::new(false));
    let raised = Arc::clone(&interrupt);
    ctrlc::set_handler(move || raised.store(true, Ordering::SeqCst))
        .context("failed to install the Ctrl-C handler")?;

    let port = link::open(&config)
        .with_context(|| format!("failed to open '{}' at {} baud", config.port, config.baud_rate))?;

    let mut stdout = io::stdout();
    write_banner(&mut stdout)?;

    let shell = Shell::new(port, SequenceFile::new(cli.sequence.clone()))
        .with_response_timeout(config.response_timeout)
        .with_interrupt(interrupt);
    shell.run(&mut Console::new(), &mut stdout)?;
    Ok(())
}
