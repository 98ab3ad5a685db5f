use std::error::Error;

/// The user-agent error sink.
///
/// Every recoverable failure the binding engine swallows (listener errors,
/// unresolved references, bad selector expressions) lands here instead of
/// unwinding. Implementations must not fail.
pub trait ErrorSink {
    fn report_error(&self, error: &(dyn Error + 'static));
}

/// An [`ErrorSink`] which discards everything.
pub struct NoopErrorSink;
impl ErrorSink for NoopErrorSink {
    fn report_error(&self, _error: &(dyn Error + 'static)) {}
}

/// An [`ErrorSink`] which logs through `tracing`.
#[cfg(feature = "tracing")]
pub struct TracingErrorSink;
#[cfg(feature = "tracing")]
impl ErrorSink for TracingErrorSink {
    fn report_error(&self, error: &(dyn Error + 'static)) {
        tracing::error!("binding error: {error}");
    }
}
