//! Telemetry bus for producer diagnostics
//!
//! Producers publish numeric samples (`decode-time`, `frame-time`, `buffer`)
//! and tags (`underflow`) on a fire-and-forget broadcast channel. Monitoring
//! front-ends subscribe; with no subscriber every emit is a no-op.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Numeric channel: seconds spent producing one frame
pub const DECODE_TIME: &str = "decode-time";
/// Numeric channel: one channel frame period, in seconds
pub const FRAME_TIME: &str = "frame-time";
/// Numeric channel: buffer fill ratio (0.0 - 1.0)
pub const BUFFER: &str = "buffer";
/// Tag channel: a frame was requested but none was ready
pub const UNDERFLOW: &str = "underflow";

/// Severity attached to tag events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A single telemetry event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TelemetryEvent {
    /// Numeric sample on a named channel
    Value {
        source: String,
        channel: String,
        value: f64,
        timestamp: DateTime<Utc>,
    },

    /// Occurrence marker on a named channel
    Tag {
        source: String,
        channel: String,
        severity: Severity,
        timestamp: DateTime<Utc>,
    },
}

impl TelemetryEvent {
    /// Channel name this event was published on
    pub fn channel(&self) -> &str {
        match self {
            TelemetryEvent::Value { channel, .. } | TelemetryEvent::Tag { channel, .. } => channel,
        }
    }
}

/// Broadcast bus for telemetry events
///
/// Cloning shares the underlying channel.
#[derive(Clone, Debug)]
pub struct TelemetryBus {
    tx: broadcast::Sender<TelemetryEvent>,
    source: String,
}

impl TelemetryBus {
    /// Create a bus retaining at most `capacity` undelivered events per
    /// subscriber; slow subscribers observe `Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            source: String::new(),
        }
    }

    /// Same channel, events stamped with `source`
    pub fn with_source(&self, source: impl Into<String>) -> Self {
        Self {
            tx: self.tx.clone(),
            source: source.into(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish a numeric sample
    pub fn value(&self, channel: &str, value: f64) {
        self.emit(TelemetryEvent::Value {
            source: self.source.clone(),
            channel: channel.to_string(),
            value,
            timestamp: Utc::now(),
        });
    }

    /// Publish a tag
    pub fn tag(&self, channel: &str, severity: Severity) {
        self.emit(TelemetryEvent::Tag {
            source: self.source.clone(),
            channel: channel.to_string(),
            severity,
            timestamp: Utc::now(),
        });
    }

    /// Publish an event, ignoring the no-subscriber case
    pub fn emit(&self, event: TelemetryEvent) {
        if self.tx.receiver_count() == 0 {
            return;
        }
        let _ = self.tx.send(event);
    }
}

impl Default for TelemetryBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let bus = TelemetryBus::new(4);
        bus.value(BUFFER, 0.5);
        bus.tag(UNDERFLOW, Severity::Warning);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_subscriber_receives_events_in_order() {
        let bus = TelemetryBus::new(8).with_source("clip");
        let mut rx = bus.subscribe();

        bus.value(DECODE_TIME, 0.004);
        bus.tag(UNDERFLOW, Severity::Warning);

        match rx.try_recv().unwrap() {
            TelemetryEvent::Value { source, channel, value, .. } => {
                assert_eq!(source, "clip");
                assert_eq!(channel, DECODE_TIME);
                assert_eq!(value, 0.004);
            }
            other => panic!("unexpected event {:?}", other),
        }
        let tag = rx.try_recv().unwrap();
        assert_eq!(tag.channel(), UNDERFLOW);
    }

    #[test]
    fn test_full_channel_does_not_block() {
        let bus = TelemetryBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..10 {
            bus.value(BUFFER, i as f64);
        }
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = TelemetryEvent::Tag {
            source: "a".into(),
            channel: UNDERFLOW.into(),
            severity: Severity::Warning,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Tag");
        assert_eq!(json["severity"], "warning");
    }
}
