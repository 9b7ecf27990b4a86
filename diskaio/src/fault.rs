use std::collections::HashMap;
use std::os::fd::AsRawFd;
use std::path::Path;

use parking_lot::Mutex;
use regex::Regex;
use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use rustix::fs::{Mode, OFlags};
use rustix::io::Errno;

/// One configured fault: what to do on the `op_index`th I/O through a
/// matched fd.
#[derive(Debug, Clone, Copy)]
pub struct IoFault {
    pub errno: i32,
    pub skip_io: bool,
}

struct FaultState {
    faults: HashMap<usize, IoFault>,
    op_count: usize,
}

/// Wraps `open`/`pread`/`pwrite` with deterministic, per-path, per-op-index
/// fault injection . Registered faults survive only for the
/// lifetime of the fds they were attached to at `open` time; faults
/// registered after a matching path has already been opened do not apply
/// retroactively.
///
/// Always compiled in: the real fault injector this is grounded on ships in
/// the production binary too, since disk-initialization failure tests need
/// it present in the same process the cache runs in.
pub struct FaultInjector {
    by_regex: Mutex<Vec<(Regex, HashMap<usize, IoFault>)>>,
    by_fd: Mutex<HashMap<i32, FaultState>>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self {
            by_regex: Mutex::new(Vec::new()),
            by_fd: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a fault for the `op_index`th `pread`/`pwrite` on any fd
    /// subsequently opened through a path matching `path_regex`. Intended
    /// to be called before cache initialisation .
    pub fn inject_fault(&self, path_regex: &str, op_index: usize, fault: IoFault) -> Result<(), regex::Error> {
        let re = Regex::new(path_regex)?;
        let mut guard = self.by_regex.lock();
        match guard.iter_mut().find(|(r, _)| r.as_str() == re.as_str()) {
            Some((_, faults)) => {
                faults.insert(op_index, fault);
            }
            None => {
                let mut faults = HashMap::new();
                faults.insert(op_index, fault);
                guard.push((re, faults));
            }
        }
        Ok(())
    }

    /// Opens `path` and attaches any matching fault schedule to the
    /// returned fd.
    pub fn open(&self, path: &Path, flags: OFlags, mode: Mode) -> Result<OwnedFd, Errno> {
        let fd = rustix::fs::open(path, flags, mode)?;
        self.attach(&fd, path);
        Ok(fd)
    }

    fn attach(&self, fd: &OwnedFd, path: &Path) {
        let path_str = path.to_string_lossy();
        let by_regex = self.by_regex.lock();
        let mut combined: HashMap<usize, IoFault> = HashMap::new();
        for (re, faults) in by_regex.iter() {
            if re.is_match(&path_str) {
                combined.extend(faults.iter().map(|(k, v)| (*k, *v)));
            }
        }
        if combined.is_empty() {
            return;
        }
        self.by_fd.lock().insert(
            fd.as_raw_fd(),
            FaultState {
                faults: combined,
                op_count: 0,
            },
        );
    }

    /// Returns the fault configured for the current op on `fd`, if any,
    /// and advances the op counter. Callers that hit a transient kernel
    /// errno on the real-I/O path call `rewind_op` to undo the advance, so
    /// the retry lands on the same fault slot.
    fn next_op(&self, raw_fd: i32) -> Option<(usize, IoFault)> {
        let mut by_fd = self.by_fd.lock();
        let state = by_fd.get_mut(&raw_fd)?;
        let index = state.op_count;
        state.op_count += 1;
        state.faults.get(&index).map(|f| (index, *f))
    }

    fn rewind_op(&self, raw_fd: i32) {
        if let Some(state) = self.by_fd.lock().get_mut(&raw_fd) {
            state.op_count = state.op_count.saturating_sub(1);
        }
    }

    pub fn pread(&self, fd: BorrowedFd<'_>, buf: &mut [u8], offset: u64) -> Result<usize, Errno> {
        let raw_fd = fd.as_raw_fd();
        match self.next_op(raw_fd) {
            Some((_, fault)) if fault.skip_io => Err(Errno::from_raw_os_error(fault.errno)),
            Some((_, fault)) => {
                let result = rustix::io::pread(fd, buf, offset);
                if fault.errno == 0 {
                    result
                } else {
                    Err(Errno::from_raw_os_error(fault.errno))
                }
            }
            None => match rustix::io::pread(fd, buf, offset) {
                Err(e) if is_transient(e) => {
                    self.rewind_op(raw_fd);
                    Err(e)
                }
                other => other,
            },
        }
    }

    pub fn pwrite(&self, fd: BorrowedFd<'_>, buf: &[u8], offset: u64) -> Result<usize, Errno> {
        let raw_fd = fd.as_raw_fd();
        match self.next_op(raw_fd) {
            Some((_, fault)) if fault.skip_io => Err(Errno::from_raw_os_error(fault.errno)),
            Some((_, fault)) => {
                let result = rustix::io::pwrite(fd, buf, offset);
                if fault.errno == 0 {
                    result
                } else {
                    Err(Errno::from_raw_os_error(fault.errno))
                }
            }
            None => match rustix::io::pwrite(fd, buf, offset) {
                Err(e) if is_transient(e) => {
                    self.rewind_op(raw_fd);
                    Err(e)
                }
                other => other,
            },
        }
    }

    pub fn forget(&self, raw_fd: i32) {
        self.by_fd.lock().remove(&raw_fd);
    }
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::new()
    }
}

/// Transient errnos retried by the worker without consuming a fault slot
/// ("Retry policy").
pub fn is_transient(e: Errno) -> bool {
    matches!(e, Errno::INTR | Errno::NOBUFS | Errno::NOMEM)
}
