use std::io;
use std::net::SocketAddrV4;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use log::trace;

use crate::probe::{Kind, Probe, Response, Step};
use crate::reactor::Reactor;
use crate::sys::Socket;
use crate::{Error, Interest, Ready};

/// What became of a connection after one event dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Still in flight.
    Running,
    /// The probe reached its terminal state; count a success.
    Finished,
    /// Socket error, hangup, or a failed probe I/O call; count an error.
    Errored,
}

/// One in-flight scan target: a non-blocking socket coupled with the probe
/// driving it.
///
/// The socket is owned exclusively. Termination consumes the connection via
/// [`Connection::close`], which deregisters from the reactor before the
/// descriptor is closed; ownership guarantees this happens at most once.
pub struct Connection {
    remote: SocketAddrV4,
    socket: Socket,
    probe: Box<dyn Probe>,
    interest: Interest,
    created_at: Instant,
    timeout: Duration,
}

impl Connection {
    /// Opens a connection to `remote` and registers it with the reactor.
    ///
    /// The whole sequence is atomic from the caller's point of view: on any
    /// error nothing stays registered and the socket is released. A
    /// synchronously unreachable network maps to [`Error::Unreachable`],
    /// which the caller discards without consuming scan budget.
    pub fn open(
        remote: SocketAddrV4,
        kind: Kind,
        timeout: Duration,
        reactor: &mut Reactor,
    ) -> Result<Connection, Error> {
        let socket = Socket::stream_v4()?;
        let created_at = Instant::now();

        match socket.connect(&remote) {
            Ok(()) => {}
            Err(ref e) if is_unreachable(e) => return Err(Error::Unreachable),
            Err(e) => return Err(e.into()),
        }

        let mut probe = kind.probe(remote);
        let interest = probe.initialise();
        reactor.register(socket.as_raw_fd(), interest)?;

        Ok(Connection {
            remote,
            socket,
            probe,
            interest,
            created_at,
            timeout,
        })
    }

    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub fn remote(&self) -> SocketAddrV4 {
        self.remote
    }

    /// The direction currently registered with the reactor.
    pub fn interest(&self) -> Interest {
        self.interest
    }

    pub fn response(&self) -> Option<Response<'_>> {
        self.probe.response()
    }

    /// Dispatches one delivered readiness mask.
    ///
    /// An error or hangup bit short-circuits the probe. The returned
    /// `io::Result` carries only reactor re-registration failures, which are
    /// fatal to the scan; probe-level I/O failures surface as
    /// [`Disposition::Errored`].
    pub fn on_event(&mut self, reactor: &mut Reactor, readiness: Ready) -> io::Result<Disposition> {
        if readiness.error_or_hangup() {
            trace!("{}: socket error or hangup: {:?}", self.remote, readiness);
            return Ok(Disposition::Errored);
        }

        match self.probe.on_event(&self.socket, readiness) {
            Ok(Step::Done) => Ok(Disposition::Finished),
            Ok(Step::Continue(None)) => Ok(Disposition::Running),
            Ok(Step::Continue(Some(interest))) => {
                reactor.modify(self.fd(), interest)?;
                self.interest = interest;
                Ok(Disposition::Running)
            }
            Err(err) => {
                trace!("{}: probe error: {}", self.remote, err);
                Ok(Disposition::Errored)
            }
        }
    }

    /// Checks the connection against its deadline. Returns `None` strictly
    /// before the deadline; from the deadline on, the probe decides whether
    /// the partial progress counts as a success.
    pub fn on_timeout(&mut self, now: Instant) -> Option<bool> {
        if now.duration_since(self.created_at) < self.timeout {
            return None;
        }

        Some(self.probe.on_timeout())
    }

    /// Tears the connection down: deregister first, then close the socket by
    /// dropping it.
    pub fn close(self, reactor: &mut Reactor) -> io::Result<()> {
        reactor.unregister(self.socket.as_raw_fd())
    }
}

fn is_unreachable(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::ENETUNREACH) | Some(libc::EHOSTUNREACH) | Some(libc::EADDRNOTAVAIL)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn loopback(listener: &TcpListener) -> SocketAddrV4 {
        match listener.local_addr().unwrap() {
            std::net::SocketAddr::V4(addr) => addr,
            other => panic!("unexpected listener address: {}", other),
        }
    }

    #[test]
    fn open_registers_initial_writable_interest() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut reactor = Reactor::new().unwrap();

        let conn = Connection::open(
            loopback(&listener),
            Kind::Connect,
            Duration::from_secs(2),
            &mut reactor,
        )
        .unwrap();

        assert_eq!(conn.interest(), Interest::Writable);
        assert_eq!(reactor.interest(conn.fd()), Some(Interest::Writable));
        assert_eq!(reactor.registered(), 1);

        conn.close(&mut reactor).unwrap();
        assert_eq!(reactor.registered(), 0);
    }

    #[test]
    fn error_mask_short_circuits_the_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut reactor = Reactor::new().unwrap();

        let mut conn = Connection::open(
            loopback(&listener),
            Kind::Connect,
            Duration::from_secs(2),
            &mut reactor,
        )
        .unwrap();

        let delivered = Ready {
            writable: true,
            errored: true,
            ..Ready::default()
        };
        let verdict = conn.on_event(&mut reactor, delivered).unwrap();
        assert_eq!(verdict, Disposition::Errored);

        conn.close(&mut reactor).unwrap();
    }

    #[test]
    fn fresh_connection_is_not_overdue() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut reactor = Reactor::new().unwrap();

        let mut conn = Connection::open(
            loopback(&listener),
            Kind::BannerGrab,
            Duration::from_secs(60),
            &mut reactor,
        )
        .unwrap();

        assert_eq!(conn.on_timeout(Instant::now()), None);

        conn.close(&mut reactor).unwrap();
    }

    #[test]
    fn overdue_silent_banner_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut reactor = Reactor::new().unwrap();

        let mut conn = Connection::open(
            loopback(&listener),
            Kind::BannerGrab,
            Duration::from_millis(10),
            &mut reactor,
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(conn.on_timeout(Instant::now()), Some(false));

        conn.close(&mut reactor).unwrap();
    }
}
