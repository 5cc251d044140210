//! Linux inotify implementation of the raw watch primitive.
//!
//! One inotify instance is shared by an [`InotifyWatcher`] (registration, used
//! by the manager under its subtree locks) and an [`InotifyEventSource`]
//! (reads, used by whichever thread drives delivery). The descriptor closes
//! when both halves are dropped.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::AsRawFd;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use tracing::trace;

use super::RawEventSource;
use super::RawWatcher;
use super::SourcePoll;
use crate::EventMask;
use crate::RawEvent;
use crate::WatchHandle;

const EVENT_HEADER_SIZE: usize = mem::size_of::<libc::inotify_event>();

/// Fits several hundred events with maximal names per read
const READ_BUFFER_SIZE: usize = 64 * 1024;

pub struct InotifyWatcher {
    fd: Arc<OwnedFd>,
}

pub struct InotifyEventSource {
    fd: Arc<OwnedFd>,
    buffer: Vec<u8>,
}

impl InotifyWatcher {
    /// Create a non-blocking inotify instance and split it into its
    /// registration and event halves.
    pub fn new() -> io::Result<(Self, InotifyEventSource)> {
        let raw = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = Arc::new(unsafe { OwnedFd::from_raw_fd(raw) });
        debug!(fd = raw, "inotify instance created");

        Ok((
            Self { fd: fd.clone() },
            InotifyEventSource {
                fd,
                buffer: vec![0u8; READ_BUFFER_SIZE],
            },
        ))
    }
}

impl RawWatcher for InotifyWatcher {
    fn register(
        &self,
        path: &Path,
        mask: EventMask,
    ) -> io::Result<WatchHandle> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let bits = mask.bits() | libc::IN_ONLYDIR | libc::IN_DONT_FOLLOW;

        let wd = unsafe { libc::inotify_add_watch(self.fd.as_raw_fd(), c_path.as_ptr(), bits) };
        if wd < 0 {
            return Err(io::Error::last_os_error());
        }
        trace!(wd, ?path, %mask, "inotify_add_watch");
        Ok(WatchHandle(wd))
    }

    fn deregister(
        &self,
        handle: WatchHandle,
    ) -> io::Result<()> {
        let rc = unsafe { libc::inotify_rm_watch(self.fd.as_raw_fd(), handle.0) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        trace!(wd = handle.0, "inotify_rm_watch");
        Ok(())
    }
}

impl RawEventSource for InotifyEventSource {
    fn poll_events(
        &mut self,
        timeout: Duration,
    ) -> io::Result<SourcePoll> {
        let fd = self.fd.as_raw_fd();
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(SourcePoll::Timeout);
            }
            return Err(err);
        }
        if rc == 0 {
            return Ok(SourcePoll::Timeout);
        }
        if pfd.revents & libc::POLLIN == 0 {
            // POLLHUP / POLLERR / POLLNVAL without data
            return Ok(SourcePoll::Closed);
        }

        let len = unsafe {
            libc::read(
                fd,
                self.buffer.as_mut_ptr() as *mut libc::c_void,
                self.buffer.len(),
            )
        };
        if len < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(SourcePoll::Timeout),
                _ => Err(err),
            };
        }
        if len == 0 {
            return Ok(SourcePoll::Closed);
        }

        Ok(SourcePoll::Events(parse_events(&self.buffer[..len as usize])))
    }
}

/// Decode a buffer of packed `struct inotify_event` records.
pub(crate) fn parse_events(buffer: &[u8]) -> Vec<RawEvent> {
    let mut events = Vec::new();
    let mut offset = 0;

    while offset + EVENT_HEADER_SIZE <= buffer.len() {
        let header: libc::inotify_event = unsafe {
            std::ptr::read_unaligned(buffer.as_ptr().add(offset) as *const libc::inotify_event)
        };
        let name_start = offset + EVENT_HEADER_SIZE;
        let name_len = header.len as usize;
        let name_end = (name_start + name_len).min(buffer.len());

        // Names are NUL padded to an alignment boundary
        let name = if name_len > 0 {
            let padded = &buffer[name_start..name_end];
            let bytes = padded.split(|b| *b == 0).next().unwrap_or_default();
            (!bytes.is_empty()).then(|| String::from_utf8_lossy(bytes).into_owned())
        } else {
            None
        };

        events.push(RawEvent {
            handle: WatchHandle(header.wd),
            mask: EventMask::from_bits(header.mask),
            cookie: header.cookie,
            name,
        });
        offset = name_start + name_len;
    }

    events
}
