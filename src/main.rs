use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::info;

use trawler::{Config, Kind, RandomV4, Report, Scanner};

/// Randomized TCP port scanner.
#[derive(Parser)]
#[command(name = "trawler", version, about)]
struct Opts {
    /// Port to scan for.
    #[arg(long)]
    port: u16,

    /// Number of random IPs to scan.
    #[arg(long)]
    total: u64,

    /// Number of simultaneous open connections.
    #[arg(long)]
    concurrency: usize,

    /// Host timeout in seconds.
    #[arg(long)]
    timeout: u64,

    /// Protocol handler.
    #[arg(long, value_enum)]
    protocol_handler: Kind,

    /// Path to log file, it will be truncated!
    #[arg(long)]
    logfile: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Opts::parse();

    if opts.protocol_handler == Kind::Http && opts.port != 80 {
        eprintln!("Port {} does not make sense with HTTP!", opts.port);
        process::exit(1);
    }
    if opts.concurrency == 0 {
        eprintln!("Concurrency must be at least 1!");
        process::exit(1);
    }

    let config = Config {
        total: opts.total,
        concurrency: opts.concurrency,
        timeout: Duration::from_secs(opts.timeout),
    };

    let report = Report::create(&opts.logfile)
        .with_context(|| format!("opening log file {}", opts.logfile.display()))?;
    let source = RandomV4::new(opts.port, opts.total);

    let mut scanner = Scanner::new(source, opts.protocol_handler, config, report)?;
    let totals = scanner.run()?;

    info!(
        "scan finished: submitted {}, successes {}, errors {}",
        totals.submitted, totals.successes, totals.errors
    );

    Ok(())
}
