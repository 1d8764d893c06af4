// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Signal handles backed by eventfd.
//!
//! The host registers a handle per endpoint; the tick engine signals a
//! duplicate of it when the ring crosses a notification boundary. Signalling
//! is a single non-blocking `write(2)` and never allocates, so it is safe to
//! call from the real-time path.

use std::io::{self, ErrorKind};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

/// A counting, cross-process wakeup object.
#[derive(Debug)]
pub struct SignalHandle {
    fd: OwnedFd,
}

impl SignalHandle {
    /// Create a new, unsignalled handle.
    pub fn new() -> io::Result<Self> {
        // SAFETY: plain syscall, flags are valid
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: fd was just returned by eventfd and is owned by nobody else
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Wrap a handle received from another process.
    pub fn from_owned_fd(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Duplicate the handle so the receiver can close it independently.
    pub fn duplicate(&self) -> io::Result<Self> {
        Ok(Self {
            fd: self.fd.try_clone()?,
        })
    }

    /// Increment the counter and wake any waiter.
    ///
    /// Returns false only if the write failed for a reason other than a
    /// saturated counter (which already means "signalled").
    pub fn signal(&self) -> bool {
        let one: u64 = 1;
        // SAFETY: fd is valid, buffer is 8 bytes as eventfd requires
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &one as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            return io::Error::last_os_error().kind() == ErrorKind::WouldBlock;
        }
        true
    }

    /// Read and reset the counter. Returns 0 if nothing was signalled.
    pub fn try_consume(&self) -> io::Result<u64> {
        let mut value: u64 = 0;
        // SAFETY: fd is valid, buffer is 8 bytes as eventfd requires
        let ret = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut value as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::WouldBlock {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(value)
    }

    /// Register with the tokio reactor for async waiting.
    pub fn into_async(self) -> io::Result<AsyncSignal> {
        Ok(AsyncSignal {
            inner: AsyncFd::with_interest(self, Interest::READABLE)?,
        })
    }
}

impl AsRawFd for SignalHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for SignalHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl From<SignalHandle> for OwnedFd {
    fn from(handle: SignalHandle) -> Self {
        handle.fd
    }
}

/// A signal handle that can be awaited.
pub struct AsyncSignal {
    inner: AsyncFd<SignalHandle>,
}

impl AsyncSignal {
    /// Wait until the handle is signalled and return the accumulated count.
    pub async fn wait(&self) -> io::Result<u64> {
        loop {
            let mut guard = self.inner.readable().await?;
            match self.inner.get_ref().try_consume()? {
                0 => guard.clear_ready(),
                count => return Ok(count),
            }
        }
    }

    pub fn get_ref(&self) -> &SignalHandle {
        self.inner.get_ref()
    }
}
