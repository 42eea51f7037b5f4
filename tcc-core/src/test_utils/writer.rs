use std::sync::{Arc, Mutex};

use super::lock;
use crate::processors::telemetry_sink::SummaryWriter;

/// [`SummaryWriter`] that keeps rendered summaries. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct CollectingWriter(Arc<Mutex<Vec<String>>>);

impl CollectingWriter {
    pub fn summaries(&self) -> Vec<String> {
        lock(&self.0).clone()
    }
}

impl SummaryWriter for CollectingWriter {
    fn write(&mut self, rendered: &str) {
        lock(&self.0).push(rendered.to_string());
    }
}
