use crate::traits::error::WirePoolError;

/// Streaming receiver for one HTTP response
///
/// Used with `HttpPool::stream`. Redirect responses are followed
/// internally and never reach the sink; `on_response` describes the final
/// response. Either the `on_response` / `on_data(.., true)` pair completes,
/// or `on_failed` fires once.
pub trait ResponseSink: Send + 'static {
    /// Status line and headers of the final response
    fn on_response(&mut self, status: u16, message: &str, headers: &[(String, String)]);

    /// A body chunk; `is_final` marks the end of the body (the chunk may be empty)
    fn on_data(&mut self, chunk: &[u8], is_final: bool);

    /// Transport failure, timeout, cancellation or redirect overflow
    fn on_failed(&mut self, error: &WirePoolError) {
        let _ = error;
    }
}
