//! Tracing setup and item/run scoped logging helpers
//!
//! Events always go to stdout. With a trace endpoint configured, events that
//! carry an `item` or `run` field are also batched and POSTed as JSON.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber, error, info};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

static SHIPPING: AtomicBool = AtomicBool::new(false);

/// Remote collector for item and run events
#[derive(Debug, Clone)]
pub struct TracingEndpoint {
    pub url: String,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl TracingEndpoint {
    pub fn new(url: String) -> Self {
        Self {
            url,
            batch_size: 20,
            flush_interval: Duration::from_millis(500),
        }
    }
}

/// One shipped event
#[derive(Serialize, Debug, Clone)]
pub struct TraceEvent {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
    pub item: Option<String>,
    pub run: Option<String>,
    pub fields: Map<String, Value>,
}

/// Layer forwarding scoped events to a background shipper task
pub struct HttpTracingLayer {
    sender: mpsc::UnboundedSender<TraceEvent>,
}

impl HttpTracingLayer {
    /// Spawns the shipper, so it must run inside a tokio runtime
    pub fn new(endpoint: TracingEndpoint) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(ship(receiver, endpoint));
        Self { sender }
    }
}

async fn ship(mut receiver: mpsc::UnboundedReceiver<TraceEvent>, endpoint: TracingEndpoint) {
    let client = reqwest::Client::new();
    let mut pending = Vec::with_capacity(endpoint.batch_size);
    let mut ticker = tokio::time::interval(endpoint.flush_interval);

    loop {
        tokio::select! {
            received = receiver.recv() => match received {
                Some(event) => {
                    pending.push(event);
                    if pending.len() >= endpoint.batch_size {
                        post_batch(&client, &endpoint.url, &mut pending).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !pending.is_empty() {
                    post_batch(&client, &endpoint.url, &mut pending).await;
                }
            }
        }
    }

    if !pending.is_empty() {
        post_batch(&client, &endpoint.url, &mut pending).await;
    }
}

async fn post_batch(client: &reqwest::Client, url: &str, pending: &mut Vec<TraceEvent>) {
    let batch = std::mem::take(pending);

    // tracing here would feed back into this layer
    match client.post(url).json(&batch).send().await {
        Ok(response) if !response.status().is_success() => {
            eprintln!("trace endpoint rejected {} event(s): HTTP {}", batch.len(), response.status());
        }
        Ok(_) => {}
        Err(e) => eprintln!("trace endpoint unreachable: {e}"),
    }
}

impl<S> tracing_subscriber::Layer<S> for HttpTracingLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut collector = FieldCollector::default();
        event.record(&mut collector);

        let item = collector.take_str("item");
        let run = collector.take_str("run");
        if item.is_none() && run.is_none() {
            return;
        }

        let metadata = event.metadata();
        let _ = self.sender.send(TraceEvent {
            timestamp: Utc::now(),
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message: collector.message,
            item,
            run,
            fields: collector.fields,
        });
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    fields: Map<String, Value>,
}

impl FieldCollector {
    fn take_str(&mut self, name: &str) -> Option<String> {
        match self.fields.remove(name)? {
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        if field.name() == "message" {
            self.message = rendered;
        } else {
            self.fields.insert(field.name().to_string(), Value::String(rendered));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(field.name().to_string(), Value::from(value));
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }
}

/// Filter directive shared by every entry point
pub fn filter_directive(log_level: Option<&str>) -> String {
    let level = log_level.unwrap_or("info");
    format!("pipeline={level},shared={level},reqwest=warn,hyper=warn")
}

/// Install the global subscriber, optionally shipping events to `endpoint`
pub fn init_tracing(endpoint: Option<TracingEndpoint>, log_level: Option<&str>) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::new(filter_directive(log_level));
    let stdout = fmt::layer().with_target(false).compact();

    let http = endpoint.map(HttpTracingLayer::new);
    SHIPPING.store(http.is_some(), Ordering::Relaxed);

    tracing_subscriber::registry().with(filter).with(http).with(stdout).init();
}

/// Let the shipper post its last batch; returns at once without an endpoint
pub async fn flush_traces() {
    if SHIPPING.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(600)).await;
    }
}

/// Wall-clock time attached to every scoped event
pub fn format_timestamp() -> String {
    Utc::now().format("%H:%M:%S%.3f").to_string()
}

#[doc(hidden)]
#[macro_export]
macro_rules! item_event {
    ($level:expr, $item_id:expr, $($arg:tt)*) => {
        tracing::event!(
            $level,
            item = %$item_id,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        )
    };
}

#[macro_export]
macro_rules! item_debug {
    ($item_id:expr, $($arg:tt)*) => { $crate::item_event!(tracing::Level::DEBUG, $item_id, $($arg)*) };
}

#[macro_export]
macro_rules! item_info {
    ($item_id:expr, $($arg:tt)*) => { $crate::item_event!(tracing::Level::INFO, $item_id, $($arg)*) };
}

#[macro_export]
macro_rules! item_warn {
    ($item_id:expr, $($arg:tt)*) => { $crate::item_event!(tracing::Level::WARN, $item_id, $($arg)*) };
}

#[macro_export]
macro_rules! item_error {
    ($item_id:expr, $($arg:tt)*) => { $crate::item_event!(tracing::Level::ERROR, $item_id, $($arg)*) };
}

pub fn log_startup(run_id: &str, details: &str) {
    info!(run = %run_id, timestamp = format_timestamp(), "Starting {}", details);
}

pub fn log_shutdown(run_id: &str, reason: &str) {
    info!(run = %run_id, timestamp = format_timestamp(), "Shutting down: {}", reason);
}

pub fn log_progress(run_id: &str, action: &str, details: &str) {
    info!(run = %run_id, timestamp = format_timestamp(), "{}: {}", action, details);
}

pub fn log_error(run_id: &str, context: &str, error: &dyn std::fmt::Display) {
    error!(run = %run_id, timestamp = format_timestamp(), error = %error, "{} failed: {}", context, error);
}
