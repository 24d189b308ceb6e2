//! A high-concurrency randomized TCP port scanner built on a single-threaded
//! epoll loop.
//!
//! The engine keeps up to `concurrency` non-blocking sockets in flight,
//! drives a short protocol conversation on each through a pluggable
//! [`Probe`], and appends per-host results to a buffered log sink. Targets
//! come from any finite iterator of addresses; [`RandomV4`] draws them
//! uniformly from the whole IPv4 space.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use trawler::{Config, Kind, RandomV4, Report, Scanner};
//!
//! let config = Config {
//!     total: 10_000,
//!     concurrency: 512,
//!     timeout: Duration::from_secs(5),
//! };
//!
//! let source = RandomV4::new(22, config.total);
//! let report = Report::create("scan.log").unwrap();
//!
//! let mut scanner = Scanner::new(source, Kind::BannerGrab, config, report).unwrap();
//! let totals = scanner.run().unwrap();
//!
//! println!(
//!     "submitted {}, successes {}, errors {}",
//!     totals.submitted, totals.successes, totals.errors
//! );
//! ```

mod conn;
mod error;
mod probe;
mod reactor;
mod report;
mod scanner;
mod source;
mod sys;

pub mod slp;

pub use conn::{Connection, Disposition};
pub use error::Error;
pub use probe::{
    BannerProbe, ConnectProbe, HttpProbe, Kind, Probe, Response, Step, MAX_BUF_SIZE, READ_SIZE,
};
pub use reactor::{Event, Events, Interest, Reactor, Ready};
pub use report::Report;
pub use scanner::{Config, Scanner, Totals, POLL_INTERVAL};
pub use source::{FileList, RandomV4, DEFAULT_FILE_PORT};
pub use sys::Socket;
