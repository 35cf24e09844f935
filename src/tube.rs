//! Process I/O tubes for exploit interaction.
//!
//! A [`Tube`] drives a spawned target over its stdin/stdout pipes and
//! implements [`Channel`] so it can be handed to the leaker and writer.
//! Reads are bounded by a per-tube timeout; the exploitation core itself
//! has none.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::channel::{find_subsequence, Channel};

/// Default timeout for recv operations (5 seconds).
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Internal read buffer size.
const BUF_SIZE: usize = 4096;

/// A bidirectional communication channel to a child process.
pub struct Tube {
    /// Feeds into the child's stdin.
    stdin: OwnedFd,
    /// Reads from the child's stdout (non-blocking).
    stdout: OwnedFd,
    /// Killed and reaped on drop.
    child: Option<Child>,
    buffer: Vec<u8>,
    timeout_ms: u64,
}

impl Tube {
    /// Spawn `program` with piped stdin/stdout.
    pub fn spawn(program: &Path, args: &[&str]) -> io::Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("child stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child stdout not captured"))?;
        log::debug!("spawned {} (pid {})", program.display(), child.id());
        match Self::from_fds(OwnedFd::from(stdin), OwnedFd::from(stdout)) {
            Ok(mut tube) => {
                tube.child = Some(child);
                Ok(tube)
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }

    /// Create a Tube over existing pipe ends.
    ///
    /// Sets the read end to non-blocking mode.
    pub fn from_fds(stdin: OwnedFd, stdout: OwnedFd) -> io::Result<Self> {
        unsafe {
            let fd = stdout.as_raw_fd();
            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(Self {
            stdin,
            stdout,
            child: None,
            buffer: Vec::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        })
    }

    /// Set the default timeout in milliseconds.
    pub fn set_timeout_ms(&mut self, ms: u64) {
        self.timeout_ms = ms;
    }

    /// Process id of the spawned child, if any.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(|c| c.id())
    }

    /// Send raw bytes to the child's stdin.
    pub fn send(&mut self, data: &[u8]) -> io::Result<()> {
        let mut total = 0;
        while total < data.len() {
            let n = unsafe {
                libc::write(
                    self.stdin.as_raw_fd(),
                    data[total..].as_ptr() as *const libc::c_void,
                    data.len() - total,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            total += n as usize;
        }
        Ok(())
    }

    /// Send bytes followed by a newline.
    pub fn sendline(&mut self, data: &[u8]) -> io::Result<()> {
        self.send(data)?;
        self.send(b"\n")
    }

    /// Receive data until a delimiter is found.
    ///
    /// Returns all data up to and including the delimiter.
    pub fn recvuntil(&mut self, delim: &[u8]) -> io::Result<Vec<u8>> {
        self.recvuntil_timeout(delim, self.timeout_ms)
    }

    /// Receive until delimiter with explicit timeout.
    pub fn recvuntil_timeout(&mut self, delim: &[u8], timeout_ms: u64) -> io::Result<Vec<u8>> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            if let Some(pos) = find_subsequence(&self.buffer, delim) {
                let end = pos + delim.len();
                return Ok(self.buffer.drain(..end).collect());
            }

            let remaining = deadline.saturating_duration_since(Instant::now()).as_millis() as u64;
            if remaining == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "recvuntil timeout with {} bytes buffered",
                        self.buffer.len()
                    ),
                ));
            }

            self.poll_read(remaining)?;
            self.fill_buffer()?;
        }
    }

    /// Receive one line (until \n).
    pub fn recvline(&mut self) -> io::Result<Vec<u8>> {
        self.recvuntil(b"\n")
    }

    // ── Internal helpers ──

    fn poll_read(&self, timeout_ms: u64) -> io::Result<()> {
        let mut pfd = libc::pollfd {
            fd: self.stdout.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout = timeout_ms.min(i32::MAX as u64) as i32;
        let ret = unsafe { libc::poll(&mut pfd, 1, timeout) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }
        if ret == 0 {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "poll timeout"));
        }
        if pfd.revents & libc::POLLHUP != 0 && pfd.revents & libc::POLLIN == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "child closed stdout",
            ));
        }
        Ok(())
    }

    fn fill_buffer(&mut self) -> io::Result<()> {
        let mut tmp = [0u8; BUF_SIZE];
        let n = unsafe {
            libc::read(
                self.stdout.as_raw_fd(),
                tmp.as_mut_ptr() as *mut libc::c_void,
                BUF_SIZE,
            )
        };
        if n > 0 {
            self.buffer.extend_from_slice(&tmp[..n as usize]);
        } else if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "EOF from child"));
        } else {
            let err = io::Error::last_os_error();
            if !matches!(
                err.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ) {
                return Err(err);
            }
        }
        Ok(())
    }
}

impl Channel for Tube {
    fn write_line(&mut self, payload: &[u8]) -> io::Result<()> {
        self.sendline(payload)
    }

    fn read_until(&mut self, delim: &[u8]) -> io::Result<Vec<u8>> {
        self.recvuntil(delim)
    }
}

impl Drop for Tube {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
