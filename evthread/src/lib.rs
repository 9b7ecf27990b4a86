//! The cooperative event-loop threads that drive [`evcore`] continuations
//! . An [`EventProcessor`] owns a named pool of [`EThread`]
//! workers; producers reach a specific worker through its
//! [`EThreadHandle`] to schedule timed or immediate work, or use the
//! `_local` free functions from inside a running worker to skip the
//! cross-thread queue entirely.

mod affinity;
mod ethread;
mod processor;
mod wake;

pub use affinity::{cpuset, cpuset_range, cpuset_replicate};
pub use ethread::{current, schedule_local_imm, EThread, EThreadHandle};
pub use processor::EventProcessor;

#[cfg(test)]
mod tests {
    use super::*;
    use evcore::{CallbackCode, Continuation, DispatchResult, Event, ProxyMutex};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Counter {
        mutex: Arc<ProxyMutex>,
        hits: Arc<AtomicUsize>,
    }

    impl Continuation for Counter {
        fn mutex(&self) -> &Arc<ProxyMutex> {
            &self.mutex
        }
        fn handle(&self, _event: &Event) -> DispatchResult {
            self.hits.fetch_add(1, Ordering::SeqCst);
            DispatchResult::Done
        }
    }

    fn wait_until(hits: &AtomicUsize, target: usize, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if hits.load(Ordering::SeqCst) >= target {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        hits.load(Ordering::SeqCst) >= target
    }

    #[test]
    fn immediate_event_dispatches_on_worker() {
        let proc = EventProcessor::spawn("test-imm", 1, None).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let cont: Arc<dyn Continuation> = Arc::new(Counter {
            mutex: ProxyMutex::new(),
            hits: hits.clone(),
        });
        proc.next_handle().schedule_imm(cont);
        assert!(wait_until(&hits, 1, Duration::from_secs(1)));
        proc.shutdown().unwrap();
    }

    #[test]
    fn timed_event_fires_after_delay() {
        let proc = EventProcessor::spawn("test-timer", 1, None).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let cont: Arc<dyn Continuation> = Arc::new(Counter {
            mutex: ProxyMutex::new(),
            hits: hits.clone(),
        });
        proc.next_handle()
            .schedule_in(cont, CallbackCode::TimerFired, Duration::from_millis(30));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(wait_until(&hits, 1, Duration::from_secs(1)));
        proc.shutdown().unwrap();
    }

    #[test]
    fn cancelled_action_suppresses_dispatch() {
        let proc = EventProcessor::spawn("test-cancel", 1, None).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let cont: Arc<dyn Continuation> = Arc::new(Counter {
            mutex: ProxyMutex::new(),
            hits: hits.clone(),
        });
        let action = proc
            .next_handle()
            .schedule_in(cont, CallbackCode::TimerFired, Duration::from_millis(30));
        action.cancel();
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        proc.shutdown().unwrap();
    }

    #[test]
    fn contended_mutex_retries_until_released() {
        let proc = EventProcessor::spawn("test-retry", 1, None).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let mutex = ProxyMutex::new();
        let cont: Arc<dyn Continuation> = Arc::new(Counter {
            mutex: mutex.clone(),
            hits: hits.clone(),
        });

        // Hold the continuation's mutex from this thread under a foreign id
        // so the worker's try_lock fails and the dispatcher must reschedule.
        let outsider = evcore::ThreadId::allocate();
        mutex.lock(outsider);
        proc.next_handle().schedule_imm(cont);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        mutex.unlock(outsider);

        assert!(wait_until(&hits, 1, Duration::from_secs(1)));
        proc.shutdown().unwrap();
    }
}
