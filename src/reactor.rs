use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use indexmap::IndexMap;

use crate::sys;

pub use crate::sys::Events;

/// The direction a connection is waiting on.
///
/// A registration carries exactly one direction at a time; there is no
/// combined or empty interest. Error and hangup conditions are delivered by
/// the kernel regardless of what was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

/// Readiness delivered for one descriptor, one flag per condition.
///
/// `errored` and `hangup` arrive unasked; `hangup` also covers an invalid
/// (already closed) descriptor, which a correctly maintained registry never
/// produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ready {
    pub readable: bool,
    pub writable: bool,
    pub errored: bool,
    pub hangup: bool,
}

impl Ready {
    /// True when the socket is dead or dying, whatever was registered.
    pub fn error_or_hangup(&self) -> bool {
        self.errored || self.hangup
    }
}

/// A readiness event delivered by [`Reactor::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    ready: Ready,
    fd: RawFd,
}

impl Event {
    pub fn new(ready: Ready, fd: RawFd) -> Event {
        Event { ready, fd }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn readiness(&self) -> Ready {
        self.ready
    }
}

/// Readiness poller over registered file descriptors.
///
/// Registrations are level-triggered and keyed by the raw fd itself. Not
/// thread-safe; owned by a single scan loop.
pub struct Reactor {
    epoll: sys::Epoll,
    registry: IndexMap<RawFd, Interest>,
}

impl Reactor {
    pub fn new() -> io::Result<Reactor> {
        Ok(Reactor {
            epoll: sys::Epoll::new()?,
            registry: IndexMap::new(),
        })
    }

    /// Registers `fd`, waiting on the given direction.
    pub fn register(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.epoll.add(fd, interest)?;
        self.registry.insert(fd, interest);

        Ok(())
    }

    /// Replaces the direction registered for `fd`.
    pub fn modify(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.epoll.modify(fd, interest)?;
        self.registry.insert(fd, interest);

        Ok(())
    }

    /// Drops the registration for `fd`. Must happen before the descriptor is
    /// closed.
    pub fn unregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.epoll.delete(fd)?;
        self.registry.swap_remove(&fd);

        Ok(())
    }

    /// Waits until a registration is ready or the deadline expires, filling
    /// `events` with one entry per ready descriptor. O(ready) per call.
    pub fn poll(&mut self, events: &mut Events, timeout: Duration) -> io::Result<()> {
        match self.epoll.wait(events, Some(timeout)) {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                // A signal cut the wait short; nothing was delivered. Leaving
                // the previous call's entries in place would dispatch stale
                // fds.
                events.clear();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Number of live registrations.
    pub fn registered(&self) -> usize {
        self.registry.len()
    }

    /// The direction currently registered for `fd`, if any.
    pub fn interest(&self, fd: RawFd) -> Option<Interest> {
        self.registry.get(&fd).copied()
    }
}

impl AsRawFd for Reactor {
    fn as_raw_fd(&self) -> RawFd {
        self.epoll.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::Socket;
    use std::os::unix::io::AsRawFd;
    use std::time::Instant;

    #[test]
    fn register_modify_unregister_track_interest() {
        let mut reactor = Reactor::new().unwrap();
        let (a, _b) = Socket::pair().unwrap();
        let fd = a.as_raw_fd();

        reactor.register(fd, Interest::Writable).unwrap();
        assert_eq!(reactor.interest(fd), Some(Interest::Writable));
        assert_eq!(reactor.registered(), 1);

        reactor.modify(fd, Interest::Readable).unwrap();
        assert_eq!(reactor.interest(fd), Some(Interest::Readable));

        reactor.unregister(fd).unwrap();
        assert_eq!(reactor.interest(fd), None);
        assert_eq!(reactor.registered(), 0);
    }

    #[test]
    fn poll_reports_writable_socket() {
        let mut reactor = Reactor::new().unwrap();
        let (a, _b) = Socket::pair().unwrap();
        let fd = a.as_raw_fd();

        reactor.register(fd, Interest::Writable).unwrap();

        let mut events = Events::with_capacity(8);
        reactor.poll(&mut events, Duration::from_millis(100)).unwrap();

        let event = events.iter().find(|e| e.fd() == fd).unwrap();
        assert!(event.readiness().writable);
        assert!(!event.readiness().error_or_hangup());
    }

    #[test]
    fn poll_deadline_expires_without_ready_fds() {
        let mut reactor = Reactor::new().unwrap();
        let (a, _b) = Socket::pair().unwrap();

        // Readable interest on an idle socket: nothing will be delivered.
        reactor.register(a.as_raw_fd(), Interest::Readable).unwrap();

        let mut events = Events::with_capacity(8);
        let start = Instant::now();
        reactor.poll(&mut events, Duration::from_millis(50)).unwrap();

        assert!(events.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
