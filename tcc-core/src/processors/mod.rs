//! Processors of the ingestion pipeline:
//!
//! - `ConsumerAdapter`: Polls a `BrokerSource`, yields `Consumed` records
//! - `Dispatcher`: Receives `Consumed`, processes inline or emits `WorkItem`
//! - `VerificationWorkerPool`: Receives `WorkItem`, runs the `RecordPipeline`
//! - `RecordPipeline`: Verifies a record, emits `ProcessingSummary`
//! - `TelemetrySink`: Receives `ProcessingSummary`, writes the summary log
//! - `ShutdownCoordinator`: Stops all of the above in order

pub mod consumer;
pub mod dispatcher;
pub mod liveness;
pub mod record_pipeline;
pub mod shutdown;
pub mod telemetry_sink;
pub mod verification_worker;

pub use consumer::{
    BrokerError, BrokerRecord, BrokerSource, ConsumerAdapter, ConsumerError, POLL_TIMEOUT,
    PollEvent, THROUGHPUT_WINDOW,
};
pub use dispatcher::{DispatchError, Dispatcher};
pub use liveness::{AssignmentHook, LivenessSignal, ReadinessFlag};
pub use record_pipeline::{
    OutcomeTally, RecordError, RecordJob, RecordOutcome, RecordPipeline,
};
pub use shutdown::{
    QUEUE_DRAIN_TIMEOUT, ShutdownCoordinator, ShutdownState, WORKER_SHUTDOWN_TIMEOUT,
};
pub use telemetry_sink::{
    SummaryContext, SummaryWriter, TelemetrySink, TracingWriter, render_summary,
};
pub use verification_worker::{IDLE_WAIT, VerificationWorkerPool};
