//! Structured-log sink.
//!
//! Values are mapped to a [`LogRecord`] and handed to a [`LogEmitter`],
//! which owns the wire framing (RFC 5424 syslog, a collector, ...). The
//! bundled [`TracingEmitter`] forwards records to `tracing`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, error, info, warn};

use crate::core::error::IntoError;
use crate::core::{Acknowledgeable, Result, Sink};
use crate::envelope::{Event, EventKind};

/// Syslog severity, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Informational,
    Debug,
}

impl Severity {
    /// Map a notification priority (`INFO`, `WARN`, `ERROR`, ...).
    pub fn from_priority(priority: &str) -> Self {
        match priority.to_ascii_uppercase().as_str() {
            "CRITICAL" | "FATAL" => Severity::Critical,
            "ERROR" => Severity::Error,
            "WARN" | "WARNING" => Severity::Warning,
            "DEBUG" | "TRACE" => Severity::Debug,
            "AUDIT" => Severity::Notice,
            _ => Severity::Informational,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Emergency => "emergency",
            Severity::Alert => "alert",
            Severity::Critical => "critical",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Notice => "notice",
            Severity::Informational => "informational",
            Severity::Debug => "debug",
        };
        f.write_str(name)
    }
}

/// Syslog facility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facility {
    Kern,
    User,
    Mail,
    Daemon,
    Auth,
    Syslog,
    Lpr,
    News,
    Uucp,
    Cron,
    Authpriv,
    Ftp,
    #[default]
    Local0,
    Local1,
    Local2,
    Local3,
    Local4,
    Local5,
    Local6,
    Local7,
}

impl Facility {
    /// Numeric code used in the syslog PRI field.
    pub fn code(&self) -> u8 {
        match self {
            Facility::Kern => 0,
            Facility::User => 1,
            Facility::Mail => 2,
            Facility::Daemon => 3,
            Facility::Auth => 4,
            Facility::Syslog => 5,
            Facility::Lpr => 6,
            Facility::News => 7,
            Facility::Uucp => 8,
            Facility::Cron => 9,
            Facility::Authpriv => 10,
            Facility::Ftp => 11,
            Facility::Local0 => 16,
            Facility::Local1 => 17,
            Facility::Local2 => 18,
            Facility::Local3 => 19,
            Facility::Local4 => 20,
            Facility::Local5 => 21,
            Facility::Local6 => 22,
            Facility::Local7 => 23,
        }
    }
}

impl fmt::Display for Facility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format!("{:?}", self).to_lowercase())
    }
}

/// The body of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogContent {
    Text(String),
    Json(Value),
}

impl fmt::Display for LogContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogContent::Text(text) => f.write_str(text),
            LogContent::Json(value) => write!(f, "{}", value),
        }
    }
}

/// What a [`LogSink`] hands to its emitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub facility: Facility,
    pub severity: Severity,
    /// Message id; the event type for decoded events
    pub id: String,
    pub content: LogContent,
    /// Structured data, rendered as SD-PARAMs by syslog emitters
    pub data: BTreeMap<String, Vec<String>>,
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    pub fn new(id: impl Into<String>, content: LogContent) -> Self {
        Self {
            facility: Facility::default(),
            severity: Severity::Informational,
            id: id.into(),
            content,
            data: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_facility(mut self, facility: Facility) -> Self {
        self.facility = facility;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Append `value` under `key`.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.entry(key.into()).or_default().push(value.into());
        self
    }

    /// The default record for a decoded event: the event as JSON content,
    /// severity from its priority (exceptions are always errors) and the
    /// correlation ids as structured data.
    pub fn for_event(event: &Event) -> Result<Self> {
        let base = event.base();
        let content = serde_json::to_value(event).into_sink_error()?;

        let severity = match event.kind() {
            EventKind::Exception => Severity::Error,
            _ => base
                .priority
                .as_deref()
                .map(Severity::from_priority)
                .unwrap_or(Severity::Informational),
        };

        let mut record = LogRecord::new(base.event_type.clone(), LogContent::Json(content))
            .with_severity(severity)
            .with_data("kind", event.kind().name());

        let ids = [
            ("unique_id", &base.unique_id),
            ("request_id", &base.request_id),
            ("global_request_id", &base.global_request_id),
            ("project_id", &base.project_id),
            ("user_id", &base.user_id),
            ("publisher_id", &base.publisher_id),
        ];
        for (key, value) in ids {
            if let Some(value) = value {
                record = record.with_data(key, value.clone());
            }
        }
        Ok(record)
    }
}

/// Receives records from a [`LogSink`] and frames them for the wire.
#[async_trait]
pub trait LogEmitter: Send {
    async fn emit(&mut self, record: LogRecord) -> Result<()>;
}

/// Emits records as `tracing` events under the `notiweld::log` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEmitter;

#[async_trait]
impl LogEmitter for TracingEmitter {
    async fn emit(&mut self, record: LogRecord) -> Result<()> {
        let data = serde_json::to_string(&record.data).into_sink_error()?;
        let content = record.content.to_string();
        let (facility, severity, id) = (record.facility, record.severity, &record.id);

        match severity {
            Severity::Emergency | Severity::Alert | Severity::Critical | Severity::Error => {
                error!(target: "notiweld::log", %facility, %severity, %id, %data, "{}", content)
            }
            Severity::Warning => {
                warn!(target: "notiweld::log", %facility, %severity, %id, %data, "{}", content)
            }
            Severity::Notice | Severity::Informational => {
                info!(target: "notiweld::log", %facility, %severity, %id, %data, "{}", content)
            }
            Severity::Debug => {
                debug!(target: "notiweld::log", %facility, %severity, %id, %data, "{}", content)
            }
        }
        Ok(())
    }
}

/// Maps each value to a [`LogRecord`], emits it, then acknowledges the
/// value.
pub struct LogSink<T, E, F> {
    emitter: E,
    mapper: F,
    facility: Option<Facility>,
    _phantom: PhantomData<fn(T)>,
}

impl<T, E, F> LogSink<T, E, F>
where
    E: LogEmitter,
    F: FnMut(&T) -> Result<LogRecord> + Send,
{
    pub fn new(emitter: E, mapper: F) -> Self {
        Self {
            emitter,
            mapper,
            facility: None,
            _phantom: PhantomData,
        }
    }

    /// Override the facility of every record.
    pub fn with_facility(mut self, facility: Facility) -> Self {
        self.facility = Some(facility);
        self
    }

    pub fn emitter(&self) -> &E {
        &self.emitter
    }
}

impl<E: LogEmitter> LogSink<Event, E, fn(&Event) -> Result<LogRecord>> {
    /// A sink logging decoded events with [`LogRecord::for_event`].
    pub fn for_events(emitter: E) -> Self {
        Self::new(emitter, LogRecord::for_event as fn(&Event) -> Result<LogRecord>)
    }
}

#[async_trait]
impl<T, E, F> Sink for LogSink<T, E, F>
where
    T: Acknowledgeable + Send + 'static,
    E: LogEmitter,
    F: FnMut(&T) -> Result<LogRecord> + Send,
{
    type Item = T;

    async fn write(&mut self, mut item: T) -> Result<()> {
        let mut record = (self.mapper)(&item)?;
        if let Some(facility) = self.facility {
            record.facility = facility;
        }
        self.emitter.emit(record).await?;
        if let Some(handle) = item.take_ack() {
            handle.ack().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ack::testing::RecordingAcker;
    use crate::core::{AckHandle, Error, Transform};
    use crate::envelope::{Envelope, ToEvent};
    use std::sync::Arc;

    #[derive(Default)]
    struct MemoryEmitter {
        records: Vec<LogRecord>,
    }

    #[async_trait]
    impl LogEmitter for MemoryEmitter {
        async fn emit(&mut self, record: LogRecord) -> Result<()> {
            self.records.push(record);
            Ok(())
        }
    }

    struct RefusingEmitter;

    #[async_trait]
    impl LogEmitter for RefusingEmitter {
        async fn emit(&mut self, _: LogRecord) -> Result<()> {
            Err(Error::custom("collector unreachable"))
        }
    }

    async fn event(message: &str, acker: &Arc<RecordingAcker>, tag: u64) -> Event {
        let mut envelope = Envelope {
            version: "2.0".into(),
            message: message.into(),
            ..Envelope::default()
        };
        envelope.ack.set(Some(AckHandle::new(tag, acker.clone())));
        ToEvent::new().apply(envelope).await.unwrap()
    }

    #[tokio::test]
    async fn test_event_records() {
        let acker = Arc::new(RecordingAcker::default());
        let mut sink = LogSink::for_events(MemoryEmitter::default()).with_facility(Facility::Local3);

        sink.write(
            event(
                r#"{"event_type":"port.delete.end","priority":"WARN","_unique_id":"u2","_context_request_id":"req-1"}"#,
                &acker,
                1,
            )
            .await,
        )
        .await
        .unwrap();
        sink.write(event(r#"{"event_type":"rebuild_instance","priority":"INFO"}"#, &acker, 2).await)
            .await
            .unwrap();

        let records = &sink.emitter().records;
        assert_eq!(records[0].id, "port.delete.end");
        assert_eq!(records[0].severity, Severity::Warning);
        assert_eq!(records[0].facility, Facility::Local3);
        assert_eq!(records[0].data["request_id"], vec!["req-1"]);
        assert_eq!(records[0].data["kind"], vec!["port"]);
        assert_eq!(records[1].severity, Severity::Error);
        assert_eq!(*acker.acks.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_emitter_failure_skips_ack() {
        let acker = Arc::new(RecordingAcker::default());
        let mut sink = LogSink::for_events(RefusingEmitter);
        let result = sink
            .write(event(r#"{"event_type":"tag.create.end"}"#, &acker, 9).await)
            .await;
        assert!(result.is_err());
        assert!(acker.acks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_custom_mapper_and_tracing_emitter() {
        let mut sink = LogSink::new(TracingEmitter, |line: &String| {
            Ok(LogRecord::new("line", LogContent::Text(line.clone())).with_severity(Severity::Debug))
        });
        assert!(sink.write("hello".to_string()).await.is_ok());
    }

    #[test]
    fn test_priority_mapping() {
        assert_eq!(Severity::from_priority("error"), Severity::Error);
        assert_eq!(Severity::from_priority("SAMPLE"), Severity::Informational);
        assert_eq!(Facility::Local7.code(), 23);
        assert!(Severity::Emergency < Severity::Debug);
    }
}
