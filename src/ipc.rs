//! C9 — the local IPC endpoint (§4.9).
//!
//! Grounded on `interprocess`'s tokio-flavored local socket/named pipe, the
//! same crate a different game's mod manager ("moss") uses for exactly this
//! role: a single resident process exposing a control surface to short-lived
//! CLI/GUI clients. The wire contract itself — `{"command", "messageId",
//! "parameters"}` requests and `{"messageId", "success", "data", "error"}`
//! responses — is literal (§6 "IPC wire contract") rather than whatever
//! shape `serde`'s default derive on the command enum would produce, so
//! requests are parsed in two steps: a raw envelope, then the typed command.
use std::sync::Arc;

use interprocess::local_socket::{
    tokio::Stream as LocalSocketStream, GenericNamespaced, ListenerOptions, ToNsName,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, info, instrument, warn};

use crate::constant::MAX_IPC_CLIENTS;
use crate::error::Error;
use crate::events::Event;

/// The command surface a connected client may invoke (§4.9). Tagged
/// adjacently on `command`/`parameters` so it deserializes directly from the
/// `parameters` object of a [`WireRequestEnvelope`].
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", content = "parameters", rename_all = "camelCase")]
pub enum Request {
    GetServiceStatus,
    GetHealthCheck,
    GetMonitoringStatus,
    PauseMonitoring,
    ResumeMonitoring,
    EnableSafeMode,
    DisableSafeMode,
    TriggerAutoHeal { installation_id: String },
    ReloadManifest,
    Subscribe,
}

/// The raw envelope every request line is decoded into first (§6), before
/// `command`/`parameters` are re-assembled into a typed [`Request`].
#[derive(Debug, Deserialize)]
struct WireRequestEnvelope {
    command: String,
    #[serde(default, rename = "messageId")]
    message_id: Option<String>,
    #[serde(default)]
    parameters: serde_json::Value,
}

impl WireRequestEnvelope {
    fn into_request(self) -> Result<(Option<String>, Request), serde_json::Error> {
        let tagged = serde_json::json!({
            "command": self.command,
            "parameters": self.parameters,
        });
        let request = serde_json::from_value(tagged)?;
        Ok((self.message_id, request))
    }
}

/// A response on the wire (§6): `{"messageId", "success", "data", "error"}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            message_id: None,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            message_id: None,
            success: true,
            data: None,
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            message_id: None,
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    fn with_message_id(mut self, message_id: Option<String>) -> Self {
        self.message_id = message_id;
        self
    }
}

/// Dispatches a decoded [`Request`] against the daemon's components,
/// producing a [`Response`]. A trait rather than a concrete struct so the
/// listener loop can be exercised in tests against a fake handler (§9).
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: Request) -> impl std::future::Future<Output = Response> + Send;
}

/// Runs the IPC listener on `socket_name`, accepting up to
/// [`MAX_IPC_CLIENTS`] concurrent connections and dispatching line-delimited
/// JSON requests to `handler`. Returns [`Error::Duplicate`] if another
/// instance already holds the endpoint (§4.9 "duplicate instance guard").
///
/// Stops accepting new connections as soon as `shutdown` fires, but does not
/// abort connections already in flight — each spawned connection task keeps
/// draining its current request/response pair to completion on its own,
/// consistent with "never abort mid-write" applied to the IPC socket.
#[instrument(skip(handler, events, shutdown))]
pub async fn serve<H: RequestHandler>(
    socket_name: &str,
    handler: Arc<H>,
    events: broadcast::Sender<Event>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<(), Error> {
    let name = socket_name
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| Error::ValidationFailed {
            target: socket_name.to_string(),
            reason: err.to_string(),
        })?;

    let listener = ListenerOptions::new().name(name).create_tokio().map_err(|err| {
        if err.kind() == std::io::ErrorKind::AddrInUse {
            Error::Duplicate
        } else {
            Error::Io(err)
        }
    })?;

    info!(%socket_name, "ipc endpoint listening");
    let connection_gate = Arc::new(Semaphore::new(MAX_IPC_CLIENTS));

    loop {
        let conn = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(err) => {
                    warn!(?err, "ipc accept failed");
                    continue;
                }
            },
            _ = shutdown.changed() => {
                info!("ipc endpoint no longer accepting new connections");
                break;
            }
        };

        let Ok(permit) = connection_gate.clone().try_acquire_owned() else {
            debug!("ipc client rejected: at capacity");
            continue;
        };

        let handler = handler.clone();
        let events_rx = events.subscribe();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(err) = handle_connection(conn, handler, events_rx).await {
                debug!(?err, "ipc connection closed with error");
            }
        });
    }

    Ok(())
}

async fn handle_connection<H: RequestHandler>(
    conn: LocalSocketStream,
    handler: Arc<H>,
    mut events_rx: broadcast::Receiver<Event>,
) -> Result<(), Error> {
    let (reader, mut writer) = tokio::io::split(conn);
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }

                let response = match serde_json::from_str::<WireRequestEnvelope>(&line) {
                    Ok(envelope) => match envelope.into_request() {
                        Ok((message_id, Request::Subscribe)) => {
                            // Subscription is handled by the event arm of
                            // this select loop for the remainder of the
                            // connection.
                            Response::ok(serde_json::json!({ "subscribed": true }))
                                .with_message_id(message_id)
                        }
                        Ok((message_id, request)) => handler.handle(request).await.with_message_id(message_id),
                        Err(err) => Response::err(format!("malformed parameters: {err}")),
                    },
                    Err(err) => Response::err(format!("malformed request: {err}")),
                };

                let mut payload = serde_json::to_vec(&response).unwrap_or_default();
                payload.push(b'\n');
                writer.write_all(&payload).await?;
            }
            event = events_rx.recv() => {
                match event {
                    Ok(event) => {
                        let mut payload = serde_json::to_vec(&event.wire_json()).unwrap_or_default();
                        payload.push(b'\n');
                        writer.write_all(&payload).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "ipc client lagged behind event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserializes_from_wire_envelope() {
        let envelope: WireRequestEnvelope =
            serde_json::from_str(r#"{"command":"getServiceStatus","messageId":"1"}"#).unwrap();
        let (message_id, request) = envelope.into_request().unwrap();

        assert_eq!(message_id, Some("1".to_string()));
        assert!(matches!(request, Request::GetServiceStatus));
    }

    #[test]
    fn test_request_with_parameters_deserializes() {
        let envelope: WireRequestEnvelope = serde_json::from_str(
            r#"{"command":"triggerAutoHeal","messageId":"2","parameters":{"installationId":"abc"}}"#,
        )
        .unwrap();
        let (message_id, request) = envelope.into_request().unwrap();

        assert_eq!(message_id, Some("2".to_string()));
        assert!(matches!(request, Request::TriggerAutoHeal { installation_id } if installation_id == "abc"));
    }

    #[test]
    fn test_request_without_message_id_is_none() {
        let envelope: WireRequestEnvelope =
            serde_json::from_str(r#"{"command":"getHealthCheck"}"#).unwrap();
        let (message_id, _) = envelope.into_request().unwrap();
        assert_eq!(message_id, None);
    }

    #[test]
    fn test_response_ok_serializes_success_true_without_error_field() {
        let response = Response::ok(serde_json::json!({ "status": "running" })).with_message_id(Some("9".to_string()));
        let text = serde_json::to_string(&response).unwrap();
        assert!(!text.contains("\"error\""));
        assert!(text.contains("\"success\":true"));
        assert!(text.contains("\"messageId\":\"9\""));
    }

    #[test]
    fn test_response_err_serializes_success_false_without_data_field() {
        let response = Response::err("boom");
        let text = serde_json::to_string(&response).unwrap();
        assert!(!text.contains("\"data\""));
        assert!(text.contains("\"success\":false"));
        assert!(text.contains("boom"));
    }
}
