use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use evcore::{Action, CallbackCode, Continuation, DispatchResult, Event, PriorityQueue, ProtectedQueue, ThreadId};
use evcore::MUTEX_RETRY_DELAY;
use log::warn;

use crate::wake::WakeSignal;

/// Upper bound on how long a worker blocks in its loop tail when nothing
/// is scheduled, so it notices process shutdown promptly even without a
/// wakeup.
const IDLE_POLL_CAP: Duration = Duration::from_millis(100);

/// A cross-thread-shareable reference to one running [`EThread`].
/// Producers on any thread call the
/// `schedule_*` methods to hand work to this specific worker; the worker
/// itself uses the `_local` free functions below instead, which skip the
/// atomics and wakeup entirely.
pub struct EThreadHandle {
    pub id: ThreadId,
    pub group: String,
    external: ProtectedQueue,
    wake: WakeSignal,
    stop: AtomicBool,
}

impl EThreadHandle {
    fn new(id: ThreadId, group: impl Into<String>) -> Self {
        Self {
            id,
            group: group.into(),
            external: ProtectedQueue::new(),
            wake: WakeSignal::new(),
            stop: AtomicBool::new(false),
        }
    }

    fn push(&self, event: Event) -> Action {
        let action = event.action();
        self.external.push(event);
        self.wake.notify();
        action
    }

    pub fn schedule_imm(&self, cont: Arc<dyn Continuation>) -> Action {
        self.push(Event::new(cont, CallbackCode::Immediate))
    }

    pub fn schedule_at(&self, cont: Arc<dyn Continuation>, code: CallbackCode, when: Instant) -> Action {
        self.push(Event::new(cont, code).at(when))
    }

    pub fn schedule_in(&self, cont: Arc<dyn Continuation>, code: CallbackCode, delay: Duration) -> Action {
        self.schedule_at(cont, code, Instant::now() + delay)
    }

    pub fn schedule_every(&self, cont: Arc<dyn Continuation>, code: CallbackCode, period: Duration) -> Action {
        self.push(Event::new(cont, code).every(period))
    }

    /// Requests the worker loop to exit after its current iteration.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.wake.notify();
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<EThreadHandle>>> = const { RefCell::new(None) };
    static LOCAL_IMMEDIATE: RefCell<VecDeque<Event>> = RefCell::new(VecDeque::new());
}

/// The current thread's own `EThread`, if this thread is one. `None` off
/// an event-loop thread (e.g. a test harness thread).
pub fn current() -> Option<Arc<EThreadHandle>> {
    CURRENT.with(|c| c.borrow().clone())
}

/// Enqueues onto the calling thread's own local queue: no cross-thread
/// atomics, no wakeup, dispatched before the next external-queue drain.
/// Panics if called off an `EThread`.
pub fn schedule_local_imm(cont: Arc<dyn Continuation>) -> Action {
    let event = Event::new(cont, CallbackCode::Immediate);
    let action = event.action();
    LOCAL_IMMEDIATE.with(|q| q.borrow_mut().push_back(event));
    action
}

fn dispatch(handle: &EThreadHandle, timer_queue: &mut PriorityQueue, mut event: Event) {
    loop {
        if event.is_cancelled() {
            return;
        }
        let cont = event.continuation.clone();
        if !cont.mutex().try_lock(handle.id) {
            event.timeout_at = Some(Instant::now() + MUTEX_RETRY_DELAY);
            timer_queue.insert(Instant::now(), event);
            return;
        }
        let result = cont.handle(&event);
        cont.mutex().unlock(handle.id);
        match result {
            DispatchResult::Done => return,
            DispatchResult::Continue => {
                if let Some(period) = event.period {
                    event.timeout_at = Some(Instant::now() + period);
                    timer_queue.insert(Instant::now(), event);
                }
                return;
            }
            DispatchResult::Restart => continue,
            DispatchResult::RestartDelayed => {
                event.timeout_at = Some(Instant::now() + MUTEX_RETRY_DELAY);
                timer_queue.insert(Instant::now(), event);
                return;
            }
        }
    }
}

fn run_loop(handle: Arc<EThreadHandle>) {
    CURRENT.with(|c| *c.borrow_mut() = Some(handle.clone()));
    let mut timer_queue = PriorityQueue::new();
    let mut last_seen = 0u64;

    loop {
        if handle.stop.load(Ordering::Acquire) {
            break;
        }

        // 1. drain external queue.
        for event in handle.external.drain() {
            let now = Instant::now();
            if event.is_ready(now) {
                dispatch(&handle, &mut timer_queue, event);
            } else {
                timer_queue.insert(now, event);
            }
        }

        // local queue: same-thread submissions skip the external path.
        let local = LOCAL_IMMEDIATE.with(|q| std::mem::take(&mut *q.borrow_mut()));
        for event in local {
            dispatch(&handle, &mut timer_queue, event);
        }

        // 2. promote ready timed events.
        let now = Instant::now();
        for event in timer_queue.check_ready(now) {
            dispatch(&handle, &mut timer_queue, event);
        }

        // 4. loop tail: block until the next deadline, capped, and woken
        // early by any push.
        let now = Instant::now();
        let wait = timer_queue
            .next_deadline()
            .map(|d| d.saturating_duration_since(now))
            .unwrap_or(IDLE_POLL_CAP)
            .min(IDLE_POLL_CAP);
        last_seen = handle.wake.wait(last_seen, wait);
    }
}

/// One worker thread running the cooperative dispatch loop.
pub struct EThread {
    pub handle: Arc<EThreadHandle>,
    join: Option<JoinHandle<()>>,
}

impl EThread {
    /// Spawns the worker. If `cpuset` is provided, the OS thread is pinned
    /// to those cores before entering the loop, using the same
    /// restricted-to-even-widths shape as `evthread::affinity::cpuset`.
    pub fn spawn(id: ThreadId, group: impl Into<String>, cpuset: Option<nix::sched::CpuSet>) -> Self {
        let handle = Arc::new(EThreadHandle::new(id, group));
        let handle2 = handle.clone();
        let join = thread::Builder::new()
            .name(format!("ev-{}", handle.group))
            .spawn(move || {
                if let Some(set) = cpuset {
                    if let Err(e) = nix::sched::sched_setaffinity(nix::unistd::Pid::from_raw(0), &set) {
                        warn!("failed to pin event thread to cpuset: {e}");
                    }
                }
                run_loop(handle2);
            })
            .expect("failed to spawn event thread");
        Self {
            handle,
            join: Some(join),
        }
    }

    pub fn request_stop(&self) {
        self.handle.request_stop();
    }

    pub fn join(mut self) -> thread::Result<()> {
        self.join.take().unwrap().join()
    }
}
