//! Batched log shipment to the central server.
//!
//! Console output is the `fmt` layer's job and happens synchronously at the
//! call site; this module adds the second half of the logging contract. The
//! [`ShipLayer`] copies every emitted event onto an unbounded channel, so a
//! log call never blocks and never fails, and the [`LogBatcher`] task drains
//! the channel on a timer (or when enough entries pile up) and posts the
//! batch. A failed post drops the batch: the console already holds the
//! durable copy.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::Context;
use vigil_config::LogDestination;
use vigil_core::api::{ApiClient, LogEntry};

/// Levels the central server's log schema knows. Anything else normalizes
/// to INFO.
pub fn normalize_level(raw: &str) -> &'static str {
    match raw {
        "INFO" => "INFO",
        "WARNING" => "WARNING",
        "ERROR" => "ERROR",
        "DEBUG" => "DEBUG",
        _ => "INFO",
    }
}

fn ship_level(level: &Level) -> &'static str {
    let raw = if *level == Level::ERROR {
        "ERROR"
    } else if *level == Level::WARN {
        "WARNING"
    } else if *level == Level::DEBUG {
        "DEBUG"
    } else if *level == Level::TRACE {
        "TRACE"
    } else {
        "INFO"
    };
    normalize_level(raw)
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    extras: String,
}

impl Visit for EventVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.extras, " {}={:?}", field.name(), value);
        }
    }
}

/// Tracing layer that mirrors every event into the shipment queue.
pub struct ShipLayer {
    source: String,
    tx: mpsc::UnboundedSender<LogEntry>,
}

impl ShipLayer {
    pub fn new(source: impl Into<String>, tx: mpsc::UnboundedSender<LogEntry>) -> Self {
        Self {
            source: source.into(),
            tx,
        }
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for ShipLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let mut message = visitor.message;
        message.push_str(&visitor.extras);

        // A closed receiver means the batcher is gone (late shutdown);
        // dropping the entry is the contract, not an error.
        let _ = self.tx.send(LogEntry {
            source: self.source.clone(),
            timestamp: vigil_core::artifacts::iso_timestamp(&chrono::Local::now()),
            level: ship_level(event.metadata().level()).to_string(),
            message,
        });
    }
}

/// Background task that drains the queue and posts batches.
pub struct LogBatcher {
    rx: mpsc::UnboundedReceiver<LogEntry>,
    api: Arc<ApiClient>,
    destination: LogDestination,
    batch_interval: Duration,
    buffer_size: usize,
    shutdown: CancellationToken,
}

impl LogBatcher {
    pub fn new(
        rx: mpsc::UnboundedReceiver<LogEntry>,
        api: Arc<ApiClient>,
        destination: LogDestination,
        batch_interval: Duration,
        buffer_size: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            rx,
            api,
            destination,
            batch_interval,
            buffer_size: buffer_size.max(1),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut pending: Vec<LogEntry> = Vec::new();
        let mut ticker = tokio::time::interval(self.batch_interval.max(Duration::from_millis(100)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // the first tick completes immediately

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => flush(&self.api, self.destination, &mut pending).await,
                entry = self.rx.recv() => match entry {
                    Some(entry) => {
                        pending.push(entry);
                        if pending.len() >= self.buffer_size {
                            flush(&self.api, self.destination, &mut pending).await;
                        }
                    }
                    None => break,
                },
            }
        }

        // Final drain-and-post on the way out.
        while let Ok(entry) = self.rx.try_recv() {
            pending.push(entry);
        }
        flush(&self.api, self.destination, &mut pending).await;
    }
}

async fn flush(api: &ApiClient, destination: LogDestination, pending: &mut Vec<LogEntry>) {
    if pending.is_empty() {
        return;
    }
    let batch = std::mem::take(pending);
    if destination == LogDestination::Local {
        return;
    }
    // Failure means the batch is gone; the console record stands.
    let _ = api.send_logs(&batch).await;
}
