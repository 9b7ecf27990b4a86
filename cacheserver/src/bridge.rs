use std::sync::Arc;

use evcore::{CallbackCode, Continuation, DispatchResult, Event, ProxyMutex};
use tokio::sync::mpsc;

use cachecore::CacheEventCode;

/// Bridges a `cachecore` continuation back into an `.await`-able stream of
/// events. `cachecore`'s own API is continuation-based, and a single
/// continuation can legitimately fire more than once over its lifetime
/// (an RWW attach fires once synchronously with `OpenReadRww`, then again
/// whenever the writer it's attached to makes progress or aborts) — that
/// rules out a one-shot channel between the synchronous continuation
/// dispatch and the async HTTP handler awaiting it.
pub struct EventBridge {
    mutex: Arc<ProxyMutex>,
    sender: mpsc::UnboundedSender<CallbackCode>,
}

impl EventBridge {
    pub fn new() -> (Arc<dyn Continuation>, mpsc::UnboundedReceiver<CallbackCode>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bridge: Arc<dyn Continuation> = Arc::new(Self {
            mutex: ProxyMutex::new(),
            sender: tx,
        });
        (bridge, rx)
    }
}

impl Continuation for EventBridge {
    fn mutex(&self) -> &Arc<ProxyMutex> {
        &self.mutex
    }

    fn handle(&self, event: &Event) -> DispatchResult {
        let _ = self.sender.send(event.callback_code);
        DispatchResult::Done
    }
}

struct Discard {
    mutex: Arc<ProxyMutex>,
}

impl Continuation for Discard {
    fn mutex(&self) -> &Arc<ProxyMutex> {
        &self.mutex
    }

    fn handle(&self, _event: &Event) -> DispatchResult {
        DispatchResult::Done
    }
}

/// A continuation for fire-and-forget completions (e.g. a stripe header
/// sync) where nothing downstream is waiting on the result.
pub fn discard() -> Arc<dyn Continuation> {
    Arc::new(Discard {
        mutex: ProxyMutex::new(),
    })
}

/// Decodes a fired [`CallbackCode`] back into the [`CacheEventCode`]
/// `cachecore` wrapped it from, returning `None` for codes this crate
/// never produces (e.g. a raw `AioDone` that bypassed a `CacheEventCode`
/// wrapper, which callers driving disk I/O directly should expect and
/// treat as "the I/O itself completed, check the request's own outcome").
pub fn decode(code: CallbackCode) -> Option<CacheEventCode> {
    match code {
        CallbackCode::Custom(raw) => cache_event_from_u32(raw),
        _ => None,
    }
}

fn cache_event_from_u32(raw: u32) -> Option<CacheEventCode> {
    use CacheEventCode::*;
    const VARIANTS: &[CacheEventCode] = &[
        OpenReadSuccess,
        OpenReadFailed,
        OpenReadRww,
        OpenWriteSuccess,
        OpenWriteFailed,
        VcReadReady,
        VcReadComplete,
        VcWriteReady,
        VcWriteComplete,
        VcEos,
        VcError,
    ];
    VARIANTS.iter().copied().find(|v| *v as u32 == raw)
}
