//! Log sinks for a dump run.
//!
//! A run logs into an explicit [`Dispatch`] rather than a process-global
//! subscriber. [`log_sink`] builds the stderr sink used by the CLI;
//! [`capture_sink`] collects formatted lines on a channel.

use std::fmt::Write as FmtWrite;
use std::str::FromStr;
use tokio::sync::mpsc;
use tracing::{Dispatch, Event, Level, Subscriber};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

/// Output format of the stderr sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "unknown log format '{}'. Valid values: text, json",
                other
            )),
        }
    }
}

/// Map a verbosity name to a level. Unknown names fall back to INFO.
pub fn parse_level(verbosity: &str) -> Level {
    match verbosity.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Build a stderr log sink without installing it globally.
pub fn log_sink(verbosity: &str, format: LogFormat) -> Dispatch {
    let builder = tracing_subscriber::fmt()
        .with_max_level(parse_level(verbosity))
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => Dispatch::new(builder.json().finish()),
        LogFormat::Text => Dispatch::new(builder.finish()),
    }
}

/// A sink that sends each event as one line to the returned receiver.
pub fn capture_sink() -> (Dispatch, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscriber = tracing_subscriber::registry().with(CaptureLayer::new(tx));
    (Dispatch::new(subscriber), rx)
}

/// A tracing layer that formats events as `LEVEL message key=value ...`
/// and sends them to a channel.
pub struct CaptureLayer {
    tx: mpsc::UnboundedSender<String>,
}

impl CaptureLayer {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut line = String::new();
        let _ = write!(line, "{:5} ", event.metadata().level());

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        line.push_str(&visitor.message);
        if !visitor.fields.is_empty() {
            line.push(' ');
            line.push_str(&visitor.fields);
        }

        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(line);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn push_field(&mut self, name: &str, value: impl std::fmt::Display) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", name, value);
    }
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            self.push_field(field.name(), format_args!("{:?}", value));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.push_field(field.name(), value);
        }
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.push_field(field.name(), value);
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.push_field(field.name(), value);
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.push_field(field.name(), value);
    }
}
