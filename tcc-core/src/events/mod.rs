//! Records, summaries and the queues that carry them.
//!
//! # Flow
//!
//! 1. `ConsumerAdapter` yields `Consumed` records -> `Dispatcher`
//! 2. `Dispatcher` either processes inline or enqueues a `WorkItem` -> verification workers
//! 3. `RecordPipeline` emits a `ProcessingSummary` -> `TelemetrySink`

pub mod channels;
pub mod types;

pub use channels::{
    BoundedSender, DrainTicket, DrainTracker, LogReceiver, LogSender, QueueClosed,
    SharedReceiver, Ticketed, UnboundedReceiver, UnboundedSender, WorkReceiver, WorkSender,
    log_queue, work_queue,
};

pub use types::{
    Consumed, InboundRecord, Payload, ProcessingSummary, VerificationOutcome, WorkItem,
};
