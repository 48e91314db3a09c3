//! # Upstream — The Single Source/Sink Being Relayed
//!
//! Usually a serial tty, sometimes another TCP endpoint. Both directions are
//! non-blocking and byte oriented. A tty is switched to raw mode on open so
//! bytes pass the kernel line discipline untouched. Baud, parity and flow
//! control stay the host's business.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};

/// Non-blocking byte source and sink.
///
/// `ErrorKind::WouldBlock` from either side is routine. A zero-length read
/// means the upstream is gone.
pub trait Upstream {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Short name for logs.
    fn describe(&self) -> String;
}

impl<U: Upstream + ?Sized> Upstream for Box<U> {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).try_read(buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).try_write(buf)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// A character device such as `/dev/ttyUSB0`, opened non-blocking.
pub struct DeviceUpstream {
    file: File,
    path: PathBuf,
}

impl DeviceUpstream {
    #[cfg(unix)]
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        use std::os::unix::fs::OpenOptionsExt;

        let path = path.as_ref().to_path_buf();
        // O_NOCTTY: the relay must never become the device's controlling process.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY)
            .open(&path)?;
        make_raw(&file)?;
        Ok(Self { file, path })
    }

    #[cfg(not(unix))]
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let _ = path;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "non-blocking device upstream requires a unix host",
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Put a terminal into raw mode. Anything that is not a tty is left alone.
#[cfg(unix)]
fn make_raw(file: &File) -> io::Result<()> {
    use std::mem::MaybeUninit;
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    // SAFETY: `fd` stays open for as long as `file` is borrowed.
    if unsafe { libc::isatty(fd) } == 0 {
        return Ok(());
    }

    let mut termios = MaybeUninit::<libc::termios>::uninit();
    // SAFETY: tcgetattr fully initialises `termios` when it returns 0.
    let mut termios = unsafe {
        if libc::tcgetattr(fd, termios.as_mut_ptr()) != 0 {
            return Err(io::Error::last_os_error());
        }
        termios.assume_init()
    };
    // SAFETY: `termios` is a valid, initialised struct owned by this frame.
    unsafe { libc::cfmakeraw(&mut termios) };
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl Upstream for DeviceUpstream {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn describe(&self) -> String {
        format!("device {}", self.path.display())
    }
}

/// A remote TCP endpoint, connected once at startup.
pub struct TcpUpstream {
    stream: TcpStream,
    peer: SocketAddr,
}

impl TcpUpstream {
    /// Blocking connect, then switch the socket to non-blocking.
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        Ok(Self { stream, peer })
    }
}

impl Upstream for TcpUpstream {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn describe(&self) -> String {
        format!("tcp {}", self.peer)
    }
}
