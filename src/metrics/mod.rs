//! Metrics and observability.
//!
//! - `events`: internal event types and the `InternalEvent` trait
//! - `server`: Prometheus recorder and HTTP endpoint

pub mod events;
pub mod server;

pub use server::init;

/// Emit an internal event.
///
/// Calls `InternalEvent::emit()` on the given event, which records the
/// corresponding Prometheus metric.
///
/// ```ignore
/// use aurora::metrics::events::RecordsRejected;
///
/// emit!(RecordsRejected { job: "raw2science".into(), count: 12 });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}
