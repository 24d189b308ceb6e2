use std::io;
use std::mem;
use std::net::SocketAddrV4;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

use libc::{self, c_int, c_void, MSG_NOSIGNAL, SOCK_CLOEXEC, SOCK_NONBLOCK};

use super::fd::FileDesc;

fn getsockopt<T: Copy>(sock: &Socket, opt: c_int, val: c_int) -> io::Result<T> {
    let mut slot: T = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<T>() as libc::socklen_t;
    syscall!(getsockopt(
        sock.raw(),
        opt,
        val,
        &mut slot as *mut _ as *mut _,
        &mut len
    ))?;
    assert_eq!(len as usize, mem::size_of::<T>());
    Ok(slot)
}

fn sockaddr_in(addr: &SocketAddrV4) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.ip().octets()),
        },
        sin_zero: [0; 8],
    }
}

/// A non-blocking stream socket.
pub struct Socket(FileDesc);

impl Socket {
    /// Creates an IPv4 stream socket in non-blocking mode.
    pub fn stream_v4() -> io::Result<Socket> {
        let fd = syscall!(socket(
            libc::AF_INET,
            libc::SOCK_STREAM | SOCK_NONBLOCK | SOCK_CLOEXEC,
            0
        ))?;

        Ok(Socket(FileDesc::new(fd)))
    }

    /// Creates a pair of connected non-blocking stream sockets.
    pub fn pair() -> io::Result<(Socket, Socket)> {
        let mut fds = [0, 0];

        syscall!(socketpair(
            libc::AF_UNIX,
            libc::SOCK_STREAM | SOCK_NONBLOCK | SOCK_CLOEXEC,
            0,
            fds.as_mut_ptr()
        ))?;

        Ok((Socket(FileDesc::new(fds[0])), Socket(FileDesc::new(fds[1]))))
    }

    /// Issues a non-blocking connect. `EINPROGRESS` is not an error: the
    /// socket reports writable once the handshake concludes, successfully or
    /// not.
    pub fn connect(&self, addr: &SocketAddrV4) -> io::Result<()> {
        let sin = sockaddr_in(addr);

        match syscall!(connect(
            self.raw(),
            &sin as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
        )) {
            Ok(_) => Ok(()),
            Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let ret = syscall!(recv(
            self.raw(),
            buf.as_mut_ptr() as *mut c_void,
            buf.len(),
            0
        ))?;
        Ok(ret as usize)
    }

    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let ret = syscall!(send(
            self.raw(),
            buf.as_ptr() as *const c_void,
            buf.len(),
            MSG_NOSIGNAL
        ))?;
        Ok(ret as usize)
    }

    /// Takes the pending socket error, if any. A non-blocking connect that
    /// failed parks its error here.
    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        let raw: c_int = getsockopt(self, libc::SOL_SOCKET, libc::SO_ERROR)?;
        if raw == 0 {
            Ok(None)
        } else {
            Ok(Some(io::Error::from_raw_os_error(raw)))
        }
    }

    fn raw(&self) -> RawFd {
        self.0.raw()
    }
}

impl FromRawFd for Socket {
    unsafe fn from_raw_fd(fd: RawFd) -> Socket {
        Socket(FileDesc::new(fd))
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.0.raw()
    }
}
