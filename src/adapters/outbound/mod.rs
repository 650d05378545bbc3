mod http_promotion_executor;
mod network_health_probe;
mod tracing_event_sink;

pub use http_promotion_executor::{HttpExecutorConfig, HttpPromotionExecutor};
pub use network_health_probe::{NetworkHealthProbe, ProbeKind};
pub use tracing_event_sink::{TracingEventSink, DEFAULT_EVENT_HISTORY};
