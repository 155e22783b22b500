//! Periodic loops that run beside the output pipeline.
//!
//! Each loop waits on its own timer or on the root cancellation token,
//! whichever fires first. None of them ends the process directly; fatal
//! conditions go through [`LifecycleEngine::shutdown`].
//!
//! [`LifecycleEngine::shutdown`]: crate::lifecycle::LifecycleEngine::shutdown

pub mod exporter;
pub mod health;
pub mod perf;
pub mod reservation;
pub mod resources;

pub use exporter::{ExportResult, MetricsExporter, Snapshot};
pub use health::{HealthResult, HealthRunner, spawn_health};
pub use perf::{PerfMonitor, PerfSample};
pub use reservation::spawn_reservation;
pub use resources::{ProcessSampler, ResourceMonitor, ResourceSample};
