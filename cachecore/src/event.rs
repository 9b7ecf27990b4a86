/// Event codes a `CacheVC`'s continuation is invoked with. Carried as a plain enum rather than
/// `evcore::CallbackCode`'s raw `u32` so call sites get exhaustiveness
/// checking; [`CacheEventCode::into_callback_code`] is the one place that
/// crosses into the scheduler's untyped representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventCode {
    OpenReadSuccess,
    OpenReadFailed,
    /// A read attached to an in-flight write rather than an existing Doc
    /// ("read-while-write"); the reader will be woken again once
    /// the writer makes progress or aborts.
    OpenReadRww,
    OpenWriteSuccess,
    OpenWriteFailed,
    VcReadReady,
    VcReadComplete,
    VcWriteReady,
    VcWriteComplete,
    /// The writer this VC was reading-while-writing against ended without
    /// ever completing ("writer abort").
    VcEos,
    VcError,
}

impl CacheEventCode {
    pub fn into_callback_code(self) -> evcore::CallbackCode {
        evcore::CallbackCode::Custom(self as u32)
    }
}
