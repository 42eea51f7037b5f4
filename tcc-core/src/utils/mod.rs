pub mod latency;
pub mod payload;
