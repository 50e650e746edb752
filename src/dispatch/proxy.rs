//! Cross-thread delivery into the reactor.
//!
//! Producers push items on an mpsc queue and write one wake-up byte into a
//! self-pipe. The reactor watches the pipe's read end like any other fd;
//! its callback drains the pipe, then hands every queued item to the
//! handler on the reactor thread.
//!
//! ```text
//!  worker thread                          reactor thread
//!  ProxySender::send(item)
//!    ├─ queue.push(item) ──────────────┐
//!    └─ write(pipe, 1 byte) ──► [pipe] ─┴─► readable callback
//!                                            ├─ drain pipe
//!                                            └─ handler(item) for each item
//! ```

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::{Rc, Weak};
use std::sync::mpsc;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{Dispatch, Events};
use crate::error::RpcError;

/// Create a pipe with both ends non-blocking and close-on-exec.
pub(crate) fn nonblocking_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: fds has room for the two descriptors pipe() writes.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe() succeeded, so both descriptors are open and ours.
    let (r, w) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    for fd in [r.as_raw_fd(), w.as_raw_fd()] {
        set_flags(fd)?;
    }
    Ok((r, w))
}

fn set_flags(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own.
    unsafe {
        let fl = libc::fcntl(fd, libc::F_GETFL);
        if fl < 0 || libc::fcntl(fd, libc::F_SETFL, fl | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd_fl = libc::fcntl(fd, libc::F_GETFD);
        if fd_fl < 0 || libc::fcntl(fd, libc::F_SETFD, fd_fl | libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Thread-safe sending half.
pub struct ProxySender<T> {
    queue: mpsc::Sender<T>,
    wake: Arc<OwnedFd>,
}

impl<T> Clone for ProxySender<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            wake: Arc::clone(&self.wake),
        }
    }
}

impl<T: Send> ProxySender<T> {
    /// Queue `item` for the reactor thread and wake it.
    pub fn send(&self, item: T) -> Result<(), RpcError> {
        self.queue.send(item).map_err(|_| RpcError::ProxyClosed)?;
        let byte = 1u8;
        // SAFETY: writing one byte from a valid stack location.
        let rv = unsafe {
            libc::write(
                self.wake.as_raw_fd(),
                &byte as *const u8 as *const libc::c_void,
                1,
            )
        };
        if rv < 0 {
            let e = io::Error::last_os_error();
            // A full pipe already guarantees a pending wake-up.
            if e.kind() != io::ErrorKind::WouldBlock && e.kind() != io::ErrorKind::Interrupted {
                return Err(RpcError::ProxyClosed);
            }
        }
        Ok(())
    }
}

struct Inbox<T> {
    queue: mpsc::Receiver<T>,
    pipe: OwnedFd,
}

/// Reactor-side half. Dropping it stops the watch and closes the pipe.
pub struct ProxyReceiver<T> {
    inbox: Rc<Inbox<T>>,
    dispatch: Weak<Dispatch>,
}

impl<T> ProxyReceiver<T> {
    pub fn fd(&self) -> RawFd {
        self.inbox.pipe.as_raw_fd()
    }
}

impl<T> Drop for ProxyReceiver<T> {
    fn drop(&mut self) {
        if let Some(d) = self.dispatch.upgrade() {
            d.close_fd(self.inbox.pipe.as_raw_fd());
        }
    }
}

/// Open a channel whose items are handed to `handler` on the reactor thread.
pub fn channel<T, F>(
    dispatch: &Rc<Dispatch>,
    handler: F,
) -> io::Result<(ProxySender<T>, ProxyReceiver<T>)>
where
    T: Send + 'static,
    F: Fn(&Dispatch, T) + 'static,
{
    let (read_end, write_end) = nonblocking_pipe()?;
    let (tx, rx) = mpsc::channel();
    let inbox = Rc::new(Inbox {
        queue: rx,
        pipe: read_end,
    });

    let fd = inbox.pipe.as_raw_fd();
    let watched = Rc::downgrade(&inbox);
    dispatch.watch_fd(fd, Events::READABLE, move |d, fd, _| {
        let Some(inbox) = watched.upgrade() else {
            return;
        };
        drain_pipe(fd);
        loop {
            match inbox.queue.try_recv() {
                Ok(item) => handler(d, item),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    debug!(fd, "all proxy senders gone");
                    break;
                }
            }
        }
    });

    Ok((
        ProxySender {
            queue: tx,
            wake: Arc::new(write_end),
        },
        ProxyReceiver {
            inbox,
            dispatch: Rc::downgrade(dispatch),
        },
    ))
}

fn drain_pipe(fd: RawFd) {
    let mut scratch = [0u8; 256];
    loop {
        // SAFETY: scratch is valid for its full length.
        let rv = unsafe { libc::read(fd, scratch.as_mut_ptr() as *mut libc::c_void, scratch.len()) };
        if rv > 0 {
            continue;
        }
        if rv < 0 {
            let e = io::Error::last_os_error();
            match e.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => {}
                _ => warn!(fd, error = %e, "proxy pipe read failed"),
            }
        }
        break;
    }
}
