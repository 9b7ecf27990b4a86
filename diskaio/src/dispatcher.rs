use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use evcore::{CallbackCode, Continuation, Event, ProxyMutex, ThreadId};
use log::error;
use parking_lot::Mutex;
use rustix::fd::AsFd;

use crate::fault::{is_transient, FaultInjector};
use crate::request::{AioOp, AioOutcome, AioRequest, AioVec};

/// Backend seam for the two AIO dispatch variants. Only the thread-pool
/// variant is implemented; a kernel-native (io_uring/libaio) backend
/// would implement this same trait.
pub trait AioBackend: Send + Sync {
    fn submit(&self, vec: AioVec);
}

/// Synthetic continuation used to flush a completion event through
/// `evthread`'s dispatch loop when the caller submitted with no specific
/// `target` thread — the completion runs right here, on the AIO worker,
/// under a throwaway mutex the worker itself "holds" by convention (no
/// other thread ever touches it).
struct LocalDispatch {
    mutex: Arc<ProxyMutex>,
    thread: ThreadId,
}

impl LocalDispatch {
    fn new(thread: ThreadId) -> Self {
        Self {
            mutex: ProxyMutex::new(),
            thread,
        }
    }

    fn run(&self, cont: &Arc<dyn Continuation>, event: &Event) {
        if event.is_cancelled() {
            return;
        }
        // The worker thread is the only caller of this helper, so the
        // try_lock below can only contend with a recursive call from
        // inside `cont`'s own handler, which would be a bug in that
        // handler, not here.
        if cont.mutex().try_lock(self.thread) {
            let _ = cont.handle(event);
            cont.mutex().unlock(self.thread);
        } else {
            error!("AIO completion continuation's mutex was held by another thread");
        }
    }
}

/// Thread-pool AIO dispatcher : `T` worker threads per disk,
/// each blocking on a channel and performing `pread`/`pwrite` synchronously.
/// Grounded on the crossbeam worker-pool shape used for CPU-bound job
/// dispatch elsewhere in this codebase.
pub struct ThreadPoolAio {
    sender: Sender<AioVec>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    error_callback: Arc<Mutex<Option<Arc<dyn Continuation>>>>,
}

impl ThreadPoolAio {
    /// Spawns `n_threads` workers, optionally routing every request through
    /// `fault_injector` instead of talking to the kernel directly.
    pub fn spawn(n_threads: usize, fault_injector: Option<Arc<FaultInjector>>) -> Self {
        let (sender, receiver) = channel::bounded::<AioVec>(n_threads * 4);
        let error_callback = Arc::new(Mutex::new(None));
        let handles = (0..n_threads)
            .map(|i| {
                spawn_worker(
                    i,
                    receiver.clone(),
                    fault_injector.clone(),
                    error_callback.clone(),
                )
            })
            .collect();
        Self {
            sender,
            handles: Mutex::new(handles),
            error_callback,
        }
    }

    /// Registers the continuation invoked on a hard (non-transient) I/O
    /// error, in addition to the normal completion callback — the
    /// registered continuation may take the failing disk offline.
    pub fn set_error_callback(&self, cont: Arc<dyn Continuation>) {
        *self.error_callback.lock() = Some(cont);
    }

    /// Stops accepting work and joins every worker. Requests already
    /// queued are drained before workers exit.
    pub fn shutdown(self) {
        drop(self.sender);
        for h in self.handles.into_inner() {
            if let Err(e) = h.join() {
                error!("AIO worker panicked: {:?}", e);
            }
        }
    }
}

impl AioBackend for ThreadPoolAio {
    fn submit(&self, vec: AioVec) {
        if self.sender.send(vec).is_err() {
            error!("AIO dispatcher submit after shutdown");
        }
    }
}

fn spawn_worker(
    id: usize,
    receiver: Receiver<AioVec>,
    fault_injector: Option<Arc<FaultInjector>>,
    error_callback: Arc<Mutex<Option<Arc<dyn Continuation>>>>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("aio-{id}"))
        .spawn(move || {
            let local_thread = ThreadId::allocate();
            let local = LocalDispatch::new(local_thread);
            while let Ok(vec) = receiver.recv() {
                let mut hard_error = false;
                for request in &vec.requests {
                    let outcome = perform(request, fault_injector.as_deref());
                    if let Err(errno) = outcome.result {
                        hard_error = true;
                        if let Some(cb) = error_callback.lock().as_ref() {
                            let event = Event::new(cb.clone(), CallbackCode::Custom(errno as u32));
                            local.run(cb, &event);
                        }
                    }
                    *request.outcome.lock() = Some(outcome);
                    if hard_error {
                        break;
                    }
                }

                let event = Event::new(vec.continuation.clone(), vec.callback_code);
                match &vec.target {
                    Some(handle) => {
                        let _ = handle.schedule_imm(vec.continuation.clone());
                    }
                    None => local.run(&vec.continuation, &event),
                }
            }
        })
        .expect("failed to spawn AIO worker thread")
}

/// Performs one request to completion: loops on partial transfer and
/// retries transient errnos indefinitely, consulting `fault_injector`
/// instead of the kernel when present.
fn perform(request: &AioRequest, fault_injector: Option<&FaultInjector>) -> AioOutcome {
    let mut done = 0usize;
    loop {
        let offset = request.offset + done as u64;
        let result = {
            let mut buf = request.buf.lock();
            match request.op {
                AioOp::Read => {
                    let slice = &mut buf[done..request.nbytes];
                    match fault_injector {
                        Some(fi) => fi.pread(request.fd.as_fd(), slice, offset),
                        None => rustix::io::pread(request.fd.as_fd(), slice, offset),
                    }
                }
                AioOp::Write => {
                    let slice = &buf[done..request.nbytes];
                    match fault_injector {
                        Some(fi) => fi.pwrite(request.fd.as_fd(), slice, offset),
                        None => rustix::io::pwrite(request.fd.as_fd(), slice, offset),
                    }
                }
            }
        };

        match result {
            Ok(0) => {
                return AioOutcome {
                    result: Err(rustix::io::Errno::IO.raw_os_error()),
                };
            }
            Ok(n) => {
                done += n;
                if done >= request.nbytes {
                    return AioOutcome { result: Ok(done) };
                }
            }
            Err(e) if is_transient(e) => continue,
            Err(e) => {
                return AioOutcome {
                    result: Err(e.raw_os_error()),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::AioVec;
    use evcore::{DispatchResult, ProxyMutex};
    use rustix::fs::{Mode, OFlags};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Recorder {
        mutex: Arc<ProxyMutex>,
        seen: Arc<AtomicUsize>,
    }

    impl Continuation for Recorder {
        fn mutex(&self) -> &Arc<ProxyMutex> {
            &self.mutex
        }
        fn handle(&self, _event: &Event) -> DispatchResult {
            self.seen.fetch_add(1, Ordering::SeqCst);
            DispatchResult::Done
        }
    }

    fn open_scratch(dir: &tempfile::TempDir, name: &str, len: usize) -> Arc<rustix::fd::OwnedFd> {
        let path = dir.path().join(name);
        std::fs::write(&path, vec![0u8; len]).unwrap();
        Arc::new(rustix::fs::open(&path, OFlags::RDWR, Mode::empty()).unwrap())
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let fd = open_scratch(&dir, "stripe.dat", 4096);
        let dispatcher = ThreadPoolAio::spawn(2, None);

        let seen = Arc::new(AtomicUsize::new(0));
        let cont: Arc<dyn Continuation> = Arc::new(Recorder {
            mutex: ProxyMutex::new(),
            seen: seen.clone(),
        });

        let write_req = AioRequest::write(fd.clone(), 0, b"hello world".to_vec());
        dispatcher.submit(AioVec::single(write_req.clone(), cont.clone(), None));

        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while seen.load(Ordering::SeqCst) < 1 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(write_req.outcome().unwrap().result, Ok(11));

        let read_req = AioRequest::read(fd, 0, 11);
        dispatcher.submit(AioVec::single(read_req.clone(), cont, None));
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while seen.load(Ordering::SeqCst) < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(read_req.take_buf(), b"hello world".to_vec());

        dispatcher.shutdown();
    }

    #[test]
    fn hard_error_invokes_error_callback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stripe.dat");
        std::fs::write(&path, vec![0u8; 16]).unwrap();
        // A read-only fd makes pwrite fail with EBADF deterministically,
        // without needing a real disk fault.
        let fd = Arc::new(rustix::fs::open(&path, OFlags::RDONLY, Mode::empty()).unwrap());
        let dispatcher = ThreadPoolAio::spawn(1, None);

        let seen = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let cont: Arc<dyn Continuation> = Arc::new(Recorder {
            mutex: ProxyMutex::new(),
            seen: seen.clone(),
        });
        let err_cont: Arc<dyn Continuation> = Arc::new(Recorder {
            mutex: ProxyMutex::new(),
            seen: errors.clone(),
        });
        dispatcher.set_error_callback(err_cont);

        let write_req = AioRequest::write(fd, 0, b"nope".to_vec());
        dispatcher.submit(AioVec::single(write_req.clone(), cont, None));

        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while seen.load(Ordering::SeqCst) < 1 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(write_req.outcome().unwrap().result.is_err());
        assert_eq!(errors.load(Ordering::SeqCst), 1);

        dispatcher.shutdown();
    }
}
