use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use crossbeam_channel as chan;
use log::debug;
use serde::Serialize;

use trawler::{slp, FileList};

/// Fetches server statuses for a list of `host[:port]` entries.
#[derive(Parser)]
#[command(name = "trawler-status", version, about)]
struct Opts {
    /// Input file of host[:port] pairs.
    #[arg(long)]
    input_file: PathBuf,

    /// Output format.
    #[arg(long, value_enum, default_value = "json")]
    output_format: Format,

    /// Number of workers to fetch statuses with.
    #[arg(long, default_value_t = 10)]
    max_workers: usize,

    /// Per-query timeout in seconds.
    #[arg(long, default_value_t = 3)]
    timeout: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Format {
    Text,
    Json,
}

/// One output record per queried entry. Failures are carried in `error`
/// rather than aborting the run.
#[derive(Debug, Serialize)]
struct Record {
    address: String,
    error: String,
    description: String,
    players: String,
    ping: String,
}

impl Record {
    fn fetch(host: &str, port: u16, timeout: Duration) -> Record {
        let address = format!("{}:{}", host, port);

        match slp::query(host, port, timeout) {
            Ok(status) => Record {
                address,
                error: String::new(),
                description: status.description,
                players: status.players.to_string(),
                ping: format!("{:.1}", status.ping.as_secs_f64() * 1000.0),
            },
            Err(err) => Record {
                address,
                error: err.to_string(),
                description: String::new(),
                players: String::new(),
                ping: String::new(),
            },
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Opts::parse();
    let timeout = Duration::from_secs(opts.timeout);
    let workers = opts.max_workers.max(1);

    let list = FileList::open(&opts.input_file)
        .with_context(|| format!("reading {}", opts.input_file.display()))?;
    debug!("{} entries to query", list.len());

    let (job_tx, job_rx) = chan::unbounded::<(String, u16)>();
    let (record_tx, record_rx) = chan::unbounded::<Record>();

    for (host, port) in list {
        job_tx.send((host, port)).expect("job channel open");
    }
    drop(job_tx);

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let job_rx = job_rx.clone();
        let record_tx = record_tx.clone();

        handles.push(thread::spawn(move || {
            while let Ok((host, port)) = job_rx.recv() {
                let record = Record::fetch(&host, port, timeout);
                if record_tx.send(record).is_err() {
                    break;
                }
            }
        }));
    }
    drop(record_tx);

    // Records stream out in completion order.
    for record in record_rx {
        match opts.output_format {
            Format::Json => println!("{}", serde_json::to_string(&record)?),
            Format::Text => {
                if !record.error.is_empty() {
                    println!("[-] Failure:");
                    println!("\taddress: {}", record.address);
                    println!("\terror:   {}", record.error);
                } else {
                    println!("[+] Success:");
                    println!("\taddress:     {}", record.address);
                    println!("\tdescription: {}", record.description);
                    println!("\tplayers:     {}", record.players);
                    println!("\tping:        {}", record.ping);
                }
            }
        }
    }

    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    Ok(())
}
