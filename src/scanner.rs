use std::io;
use std::net::SocketAddrV4;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use log::{debug, trace};

use crate::conn::{Connection, Disposition};
use crate::probe::Kind;
use crate::reactor::{Events, Reactor};
use crate::report::Report;
use crate::Error;

/// Upper bound on the readiness-poll wait. Bounds housekeeping latency.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How often status is printed, the log flushed, and stalled connections
/// swept.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

const EVENTS_CAPACITY: usize = 1024;

/// Scan parameters.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Total admission budget.
    pub total: u64,
    /// Maximum in-flight connections.
    pub concurrency: usize,
    /// Per-connection deadline.
    pub timeout: Duration,
}

/// Counters reported at the end of a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub submitted: u64,
    pub successes: u64,
    pub errors: u64,
}

/// The single-threaded scan loop.
///
/// Owns the reactor, the fd-keyed connection table, the counters and the
/// report sink. Each iteration tops the table up from the address source,
/// dispatches readiness events, and once per second runs housekeeping. The
/// loop ends when the source is exhausted and the table is empty.
pub struct Scanner<S> {
    source: S,
    kind: Kind,
    config: Config,
    reactor: Reactor,
    conns: IndexMap<RawFd, Connection>,
    report: Report,
    totals: Totals,
}

impl<S> Scanner<S>
where
    S: Iterator<Item = SocketAddrV4>,
{
    pub fn new(source: S, kind: Kind, config: Config, report: Report) -> io::Result<Scanner<S>> {
        Ok(Scanner {
            source,
            kind,
            config,
            reactor: Reactor::new()?,
            conns: IndexMap::new(),
            report,
            totals: Totals::default(),
        })
    }

    pub fn run(&mut self) -> Result<Totals, Error> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let mut last_housekeeping = Instant::now();
        let mut exhausted = false;

        while !self.conns.is_empty() || !exhausted {
            while self.conns.len() < self.config.concurrency && !exhausted {
                exhausted = !self.admit_next()?;
            }

            self.reactor.poll(&mut events, POLL_INTERVAL)?;

            for event in events.iter() {
                let fd = event.fd();
                let conn = match self.conns.get_mut(&fd) {
                    Some(conn) => conn,
                    None => panic!("reactor delivered unknown fd {}", fd),
                };

                match conn.on_event(&mut self.reactor, event.readiness())? {
                    Disposition::Running => {}
                    Disposition::Finished => self.complete(fd)?,
                    Disposition::Errored => self.fail(fd)?,
                }
            }

            let now = Instant::now();
            if now.duration_since(last_housekeeping) > HOUSEKEEPING_INTERVAL {
                self.housekeep(now)?;
                last_housekeeping = now;
            }

            debug_assert!(self.conns.len() <= self.config.concurrency);
            debug_assert_eq!(self.reactor.registered(), self.conns.len());
        }

        self.report.flush().map_err(Error::Io)?;

        debug_assert_eq!(
            self.totals.successes + self.totals.errors,
            self.totals.submitted
        );

        Ok(self.totals)
    }

    /// Admits one connection from the source. Returns false once the source
    /// or the submission budget is exhausted. Synchronously unreachable
    /// targets are dropped without consuming budget.
    fn admit_next(&mut self) -> Result<bool, Error> {
        loop {
            if self.totals.submitted >= self.config.total {
                return Ok(false);
            }

            let remote = match self.source.next() {
                Some(remote) => remote,
                None => return Ok(false),
            };

            match Connection::open(remote, self.kind, self.config.timeout, &mut self.reactor) {
                Ok(conn) => {
                    let fd = conn.fd();
                    trace!("{}: admitted on fd {}", remote, fd);

                    if self.conns.insert(fd, conn).is_some() {
                        panic!("fd {} admitted twice", fd);
                    }
                    self.totals.submitted += 1;

                    return Ok(true);
                }
                Err(Error::Unreachable) => {
                    trace!("{}: unreachable, skipped", remote);
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn complete(&mut self, fd: RawFd) -> io::Result<()> {
        let conn = self.conns.swap_remove(&fd).expect("completed fd not tracked");

        self.totals.successes += 1;

        // Tear the connection down even when the record cannot be written;
        // the sink error is fatal either way.
        let recorded = self.report.success(&conn);
        conn.close(&mut self.reactor)?;
        recorded
    }

    fn fail(&mut self, fd: RawFd) -> io::Result<()> {
        let conn = self.conns.swap_remove(&fd).expect("failed fd not tracked");

        self.totals.errors += 1;
        conn.close(&mut self.reactor)
    }

    /// Prints status, flushes the log sink, and sweeps a snapshot of the
    /// table for overdue connections. The snapshot keeps removals from
    /// disturbing the iteration.
    fn housekeep(&mut self, now: Instant) -> io::Result<()> {
        debug!(
            "housekeeping: {} conns in flight, {} submitted",
            self.conns.len(),
            self.totals.submitted
        );

        self.report.status(
            self.conns.len(),
            self.totals.submitted,
            self.totals.successes,
            self.totals.errors,
        );
        self.report.flush()?;

        let snapshot: Vec<RawFd> = self.conns.keys().copied().collect();
        for fd in snapshot {
            let verdict = self
                .conns
                .get_mut(&fd)
                .expect("swept fd vanished")
                .on_timeout(now);

            match verdict {
                None => {}
                Some(true) => self.complete(fd)?,
                Some(false) => self.fail(fd)?,
            }
        }

        Ok(())
    }
}
