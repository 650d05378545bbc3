mod event_sink;
mod health_probe;
mod promotion_executor;

pub use event_sink::EventSink;
pub use health_probe::HealthProbe;
pub use promotion_executor::{ExecutorError, PromotionExecutor};
