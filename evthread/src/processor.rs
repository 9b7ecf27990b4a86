use std::sync::Arc;
use std::thread;

use evcore::ThreadId;
use nix::sched::CpuSet;

use crate::affinity;
use crate::ethread::{EThread, EThreadHandle};

/// A named group of [`EThread`] workers sharing a scheduling role:
/// callers address a group by name — e.g. `"NET"`, `"AIO"`, `"CACHE"` —
/// and round-robin or hash across its members rather than address one
/// thread directly.
pub struct EventProcessor {
    group: String,
    threads: Vec<EThread>,
    next: std::sync::atomic::AtomicUsize,
}

impl EventProcessor {
    /// Spawns `n_threads` workers named `group`. When `affine` is set, each
    /// worker is pinned to a disjoint range of `cores_per_worker` cores
    /// starting at `core_offset` (see [`affinity::cpuset`]); `affine =
    /// false` leaves threads unpinned, inheriting the process's mask.
    pub fn spawn(
        group: impl Into<String>,
        n_threads: usize,
        affine: Option<(usize, usize)>,
    ) -> nix::Result<Self> {
        let group = group.into();
        let masks: Vec<Option<CpuSet>> = match affine {
            Some((core_offset, cores_per_worker)) => {
                affinity::cpuset(core_offset, n_threads, cores_per_worker)?
                    .into_iter()
                    .map(Some)
                    .collect()
            }
            None => (0..n_threads).map(|_| None).collect(),
        };

        let threads = masks
            .into_iter()
            .enumerate()
            .map(|(_, mask)| EThread::spawn(ThreadId::allocate(), group.clone(), mask))
            .collect();

        Ok(Self {
            group,
            threads,
            next: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Picks the next worker in round-robin order. Affinity is a hint
    /// honored by the caller, not enforced by the processor — a
    /// continuation that needs a specific thread uses that thread's handle
    /// directly via [`Event::with_affinity`](evcore::Event::with_affinity)
    /// and a caller-side lookup, not through this method.
    pub fn next_handle(&self) -> Arc<EThreadHandle> {
        let i = self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % self.threads.len();
        self.threads[i].handle.clone()
    }

    pub fn handle(&self, id: ThreadId) -> Option<Arc<EThreadHandle>> {
        self.threads.iter().find(|t| t.handle.id == id).map(|t| t.handle.clone())
    }

    /// Requests every worker to stop after its current iteration and joins
    /// them all, returning the first panic encountered, if any.
    pub fn shutdown(self) -> thread::Result<()> {
        for t in &self.threads {
            t.request_stop();
        }
        let mut first_err = Ok(());
        for t in self.threads {
            if let Err(e) = t.join() {
                if first_err.is_ok() {
                    first_err = Err(e);
                }
            }
        }
        first_err
    }
}
