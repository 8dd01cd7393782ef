//! Audit Sink Adapters
//!
//! Implements the `AuditSink` port with various backends.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::domain::events::AuditEvent;
use crate::domain::ports::AuditSink;
use crate::error::Result;

/// Publishes audit events to the tracing system.
#[derive(Debug, Clone, Default)]
pub struct LoggingAuditSink {
    /// Log at info level instead of debug
    info_level: bool,
}

impl LoggingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info_level() -> Self {
        Self { info_level: true }
    }

    pub fn debug_level() -> Self {
        Self { info_level: false }
    }
}

#[async_trait]
impl AuditSink for LoggingAuditSink {
    async fn publish(&self, event: AuditEvent) -> Result<()> {
        let event_type = event.event_type();
        let json = serde_json::to_string(&event)?;

        if self.info_level {
            info!(event_type = %event_type, event = %json, "Audit event");
        } else {
            debug!(event_type = %event_type, event = %json, "Audit event");
        }

        Ok(())
    }
}

/// Collects audit events in memory for inspection.
#[derive(Debug, Default)]
pub struct InMemoryAuditCollector {
    events: parking_lot::RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Events with the given `event_type()` name.
    pub fn events_of_type(&self, event_type: &str) -> Vec<AuditEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditCollector {
    async fn publish(&self, event: AuditEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }

    async fn publish_all(&self, events: Vec<AuditEvent>) -> Result<()> {
        self.events.write().extend(events);
        Ok(())
    }
}

/// Fans each event out to several sinks, stopping at the first failure.
#[derive(Default)]
pub struct CompositeAuditSink {
    sinks: Vec<Box<dyn AuditSink>>,
}

impl CompositeAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink<S: AuditSink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl std::fmt::Debug for CompositeAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeAuditSink")
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

#[async_trait]
impl AuditSink for CompositeAuditSink {
    async fn publish(&self, event: AuditEvent) -> Result<()> {
        for sink in &self.sinks {
            sink.publish(event.clone()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: AuditSink + ?Sized> AuditSink for std::sync::Arc<S> {
    async fn publish(&self, event: AuditEvent) -> Result<()> {
        (**self).publish(event).await
    }

    async fn publish_all(&self, events: Vec<AuditEvent>) -> Result<()> {
        (**self).publish_all(events).await
    }
}
