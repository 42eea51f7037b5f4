//! TelemetrySink processor.
//!
//! The only consumer of the log queue. Every summary is rendered into one
//! multi-line block and written in a single call, so blocks from different
//! workers never interleave.

use std::fmt::{self, Write as _};

use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

use super::shutdown::ShutdownState;
use super::verification_worker::IDLE_WAIT;
use crate::config::{ConcurrencyMode, DeploymentLabels};
use crate::events::{LogReceiver, ProcessingSummary, Ticketed};
use crate::metrics::{self, SharedMetrics, error_type};

const RULE_WIDTH: usize = 70;

/// Destination for rendered summaries.
pub trait SummaryWriter: Send + 'static {
    fn write(&mut self, rendered: &str);
}

/// Writes each summary as one `tracing` info event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingWriter;

impl SummaryWriter for TracingWriter {
    fn write(&mut self, rendered: &str) {
        info!("{rendered}");
    }
}

/// Deployment facts repeated in every summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryContext {
    pub processing_mode: ConcurrencyMode,
    pub cache_did: bool,
    pub verification_enabled: bool,
}

impl From<&DeploymentLabels> for SummaryContext {
    fn from(labels: &DeploymentLabels) -> Self {
        Self {
            processing_mode: labels.processing_mode,
            cache_did: labels.cache_did,
            verification_enabled: labels.ssi_validation,
        }
    }
}

/// Render the multi-line processing summary block.
pub fn render_summary(
    summary: &ProcessingSummary,
    context: &SummaryContext,
) -> Result<String, fmt::Error> {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = String::new();
    writeln!(out)?;
    writeln!(out, "{rule}")?;
    writeln!(out, "MESSAGE PROCESSING SUMMARY")?;
    writeln!(out, "{rule}")?;
    writeln!(out, "Processing mode: {}", context.processing_mode)?;
    writeln!(out, "Cache did: {}", context.cache_did)?;
    writeln!(out, "Topic: '{}'", summary.topic)?;
    writeln!(out, "Key: '{}'", summary.key)?;
    writeln!(out, "Trade Event ID: '{}'", summary.trade_event_id)?;
    writeln!(out, "DID: {}", summary.subject_id)?;
    writeln!(out, "SSI Validation Expected: {}", context.verification_enabled)?;
    writeln!(out, "Verification Result: {}", summary.outcome.verified)?;
    writeln!(
        out,
        "Processing Duration: {:.3}s",
        summary.processing_duration.as_secs_f64()
    )?;
    writeln!(
        out,
        "Verification Request Duration: {:.3}s",
        summary.verification_duration.as_secs_f64()
    )?;
    match summary.end_to_end_latency {
        Some(latency) => writeln!(out, "End-to-End Latency: {latency:.3}s")?,
        None => writeln!(out, "End-to-End Latency: N/A")?,
    }
    write!(out, "{rule}")?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// TelemetrySink
// ---------------------------------------------------------------------------

/// Writes summaries from the log queue until `Stopped` is broadcast.
pub struct TelemetrySink<W: SummaryWriter> {
    log_rx: LogReceiver,
    shutdown_rx: watch::Receiver<ShutdownState>,
    writer: W,
    context: SummaryContext,
    metrics: SharedMetrics,
}

impl<W: SummaryWriter> TelemetrySink<W> {
    pub fn new(
        log_rx: LogReceiver,
        shutdown_rx: watch::Receiver<ShutdownState>,
        writer: W,
        context: SummaryContext,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            log_rx,
            shutdown_rx,
            writer,
            context,
            metrics,
        }
    }

    /// Run until `Stopped` is broadcast or the log queue closes.
    pub async fn run(mut self) {
        info!("Telemetry sink started");

        loop {
            if *self.shutdown_rx.borrow_and_update() == ShutdownState::Stopped {
                break;
            }

            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                received = timeout(IDLE_WAIT, self.log_rx.recv()) => match received {
                    Err(_) => continue,
                    Ok(Some(summary)) => self.emit(summary),
                    Ok(None) => {
                        info!("Log queue closed");
                        break;
                    }
                },
            }
        }

        info!("Telemetry sink stopped");
    }

    fn emit(&mut self, item: Ticketed<ProcessingSummary>) {
        let (summary, _ticket) = item.into_parts();
        match render_summary(&summary, &self.context) {
            Ok(rendered) => self.writer.write(&rendered),
            Err(e) => {
                warn!(topic = %summary.topic, error = %e, "Failed to render processing summary");
                self.metrics.increment_counter(
                    metrics::PROCESSING_ERRORS,
                    &[
                        (metrics::TOPIC, summary.topic.as_str()),
                        (metrics::ERROR_TYPE, error_type::RENDER_ERROR),
                    ],
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{VerificationOutcome, log_queue};
    use crate::test_utils::{CollectingWriter, InMemoryMetrics};
    use std::sync::Arc;
    use std::time::Duration;

    fn summary(key: &str, latency: Option<f64>) -> ProcessingSummary {
        ProcessingSummary {
            topic: "trades".into(),
            key: key.into(),
            trade_event_id: "evt-1".into(),
            subject_id: "did:key:z6MkTrader".into(),
            outcome: VerificationOutcome {
                verified: true,
                ..Default::default()
            },
            processing_duration: Duration::from_millis(1234),
            verification_duration: Duration::from_millis(1000),
            end_to_end_latency: latency,
        }
    }

    fn context() -> SummaryContext {
        SummaryContext {
            processing_mode: ConcurrencyMode::Parallel,
            cache_did: false,
            verification_enabled: true,
        }
    }

    #[test]
    fn test_render_summary() {
        let rendered = render_summary(&summary("k1", Some(2.5)), &context()).unwrap();
        let rule = "=".repeat(70);
        let expected = format!(
            "\n{rule}\nMESSAGE PROCESSING SUMMARY\n{rule}\n\
             Processing mode: async\n\
             Cache did: false\n\
             Topic: 'trades'\n\
             Key: 'k1'\n\
             Trade Event ID: 'evt-1'\n\
             DID: did:key:z6MkTrader\n\
             SSI Validation Expected: true\n\
             Verification Result: true\n\
             Processing Duration: 1.234s\n\
             Verification Request Duration: 1.000s\n\
             End-to-End Latency: 2.500s\n\
             {rule}"
        );
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_render_without_latency() {
        let rendered = render_summary(&summary("k1", None), &context()).unwrap();
        assert!(rendered.contains("End-to-End Latency: N/A\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_writes_until_stopped() {
        let (log_tx, log_rx) = log_queue();
        let (state_tx, state_rx) = watch::channel(ShutdownState::Running);
        let writer = CollectingWriter::default();
        let sink = TelemetrySink::new(
            log_rx,
            state_rx,
            writer.clone(),
            context(),
            Arc::new(InMemoryMetrics::default()),
        );
        let handle = tokio::spawn(sink.run());

        log_tx.send(summary("k1", None)).unwrap();
        log_tx.send(summary("k2", None)).unwrap();

        // Still writing while draining.
        state_tx.send(ShutdownState::Draining).unwrap();
        log_tx.send(summary("k3", None)).unwrap();
        log_tx.tracker().drained().await;
        assert_eq!(writer.summaries().len(), 3);
        assert!(writer.summaries()[2].contains("Key: 'k3'"));

        state_tx.send(ShutdownState::Stopped).unwrap();
        handle.await.unwrap();
    }
}
