//! Shared event type broadcast to IPC subscribers, and emitted internally by
//! the watcher, integrity checker, heal supervisor, and safe-mode manager
//! (§4.9 "clients may subscribe to a stream of service events").
use chrono::{DateTime, Utc};

/// One of the literal event kinds the IPC broadcast contract names (§6
/// "Event stream" — the wire shape is `{"event": <name>, "timestamp": ...,
/// "data": {...}}`, never the internally convenient shape `serde`'s default
/// tagged-enum derive would produce).
#[derive(Debug, Clone)]
pub enum Event {
    InjectionCompleted {
        installation_id: String,
        fingerprint: String,
        at: DateTime<Utc>,
    },
    InjectionFailed {
        installation_id: String,
        error: String,
        at: DateTime<Utc>,
    },
    IntegrityViolation {
        installation_id: String,
        violations: Vec<String>,
        consecutive_failures: u32,
        at: DateTime<Utc>,
    },
    VivaldiUpdateDetected {
        installation_id: String,
        new_version: Option<String>,
        at: DateTime<Utc>,
    },
    SafeModeChanged {
        active: bool,
        at: DateTime<Utc>,
    },
    MonitoringStateChanged {
        paused: bool,
        at: DateTime<Utc>,
    },
    ServiceHealthChanged {
        healthy: bool,
        detail: Option<String>,
        at: DateTime<Utc>,
    },
    ManifestUpdated {
        reason: String,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::InjectionCompleted { .. } => "InjectionCompleted",
            Event::InjectionFailed { .. } => "InjectionFailed",
            Event::IntegrityViolation { .. } => "IntegrityViolation",
            Event::VivaldiUpdateDetected { .. } => "VivaldiUpdateDetected",
            Event::SafeModeChanged { .. } => "SafeModeChanged",
            Event::MonitoringStateChanged { .. } => "MonitoringStateChanged",
            Event::ServiceHealthChanged { .. } => "ServiceHealthChanged",
            Event::ManifestUpdated { .. } => "ManifestUpdated",
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match *self {
            Event::InjectionCompleted { at, .. }
            | Event::InjectionFailed { at, .. }
            | Event::IntegrityViolation { at, .. }
            | Event::VivaldiUpdateDetected { at, .. }
            | Event::SafeModeChanged { at, .. }
            | Event::MonitoringStateChanged { at, .. }
            | Event::ServiceHealthChanged { at, .. }
            | Event::ManifestUpdated { at, .. } => at,
        }
    }

    /// Serializes to the literal broadcast wire shape (§6): `{"event":
    /// <name>, "timestamp": <rfc3339>, "data": {...}}`. Field names inside
    /// `data` follow the manifest's camelCase convention.
    pub fn wire_json(&self) -> serde_json::Value {
        let data = match self {
            Event::InjectionCompleted { installation_id, fingerprint, .. } => serde_json::json!({
                "installationId": installation_id,
                "fingerprint": fingerprint,
            }),
            Event::InjectionFailed { installation_id, error, .. } => serde_json::json!({
                "installationId": installation_id,
                "error": error,
            }),
            Event::IntegrityViolation {
                installation_id,
                violations,
                consecutive_failures,
                ..
            } => serde_json::json!({
                "installationId": installation_id,
                "violations": violations,
                "consecutiveFailures": consecutive_failures,
            }),
            Event::VivaldiUpdateDetected { installation_id, new_version, .. } => serde_json::json!({
                "installationId": installation_id,
                "newVersion": new_version,
            }),
            Event::SafeModeChanged { active, .. } => serde_json::json!({ "active": active }),
            Event::MonitoringStateChanged { paused, .. } => serde_json::json!({ "paused": paused }),
            Event::ServiceHealthChanged { healthy, detail, .. } => serde_json::json!({
                "healthy": healthy,
                "detail": detail,
            }),
            Event::ManifestUpdated { reason, .. } => serde_json::json!({ "reason": reason }),
        };

        serde_json::json!({
            "event": self.name(),
            "timestamp": self.at(),
            "data": data,
        })
    }
}

/// Broadcasts events to connected IPC clients. Bounded so a slow or
/// disconnected subscriber cannot apply backpressure to the producers; lagged
/// subscribers simply miss the oldest unread events (§4.9).
pub fn channel() -> (tokio::sync::broadcast::Sender<Event>, tokio::sync::broadcast::Receiver<Event>) {
    tokio::sync::broadcast::channel(256)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_json_uses_literal_event_name_and_shape() {
        let event = Event::SafeModeChanged { active: true, at: Utc::now() };
        let wire = event.wire_json();

        assert_eq!(wire["event"], "SafeModeChanged");
        assert_eq!(wire["data"]["active"], true);
        assert!(wire.get("timestamp").is_some());
    }

    #[test]
    fn test_wire_json_integrity_violation_carries_violation_list() {
        let event = Event::IntegrityViolation {
            installation_id: "abc".to_string(),
            violations: vec!["loader file missing: loader.js".to_string()],
            consecutive_failures: 2,
            at: Utc::now(),
        };
        let wire = event.wire_json();

        assert_eq!(wire["data"]["installationId"], "abc");
        assert_eq!(wire["data"]["consecutiveFailures"], 2);
        assert_eq!(wire["data"]["violations"][0], "loader file missing: loader.js");
    }
}
