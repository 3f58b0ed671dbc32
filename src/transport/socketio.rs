//! Socket.IO transport: the adapter's connection to the controller.
//!
//! Outbound events: `connect`, `disconnect`, `bot_request` (wraps an
//! [`IncomingEventPayload`]), `request_queued`, `request_success`,
//! `request_failed`. Inbound: `bot_response`, forwarded onto an `mpsc`
//! channel so the outgoing processor consumes it in arrival order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use rust_socketio::asynchronous::{Client, ClientBuilder};
use rust_socketio::Payload;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

use crate::error::{Result, TransportError};
use crate::events::incoming::IncomingEventPayload;
use crate::platform::PlatformDriver;

/// One `bot_response` delivery, parsed but not yet validated against a
/// known event shape — that happens in `OutgoingEventBuilder`.
#[derive(Debug, Clone)]
pub struct InboundCommand {
    pub event_type: String,
    pub data: Value,
    pub request_id: Option<String>,
}

pub struct SocketIoTransport {
    url: String,
    adapter_type: String,
    client: RwLock<Option<Client>>,
    reconnect_backoff_ms_base: u64,
    reconnect_backoff_ms_max: u64,
}

impl SocketIoTransport {
    pub fn new(
        url: impl Into<String>,
        adapter_type: impl Into<String>,
        reconnect_backoff_ms_base: u64,
        reconnect_backoff_ms_max: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            url: url.into(),
            adapter_type: adapter_type.into(),
            client: RwLock::new(None),
            reconnect_backoff_ms_base,
            reconnect_backoff_ms_max,
        })
    }

    /// Connect to the controller, registering `bot_response` to forward
    /// onto `inbound`. Replaces any existing connection.
    pub async fn connect(&self, inbound: mpsc::Sender<InboundCommand>) -> Result<()> {
        let url = self.url.clone();
        let client = ClientBuilder::new(url.clone())
            .namespace("/")
            .on("bot_response", move |payload, _socket: Client| {
                let tx = inbound.clone();
                async move {
                    if let Some(command) = parse_bot_response(payload) {
                        if tx.send(command).await.is_err() {
                            warn!("bot_response received but the outgoing processor channel is closed");
                        }
                    }
                }
                .boxed()
            })
            .on("error", |payload, _socket: Client| {
                async move {
                    warn!(?payload, "socket.io transport error event");
                }
                .boxed()
            })
            .connect()
            .await
            .map_err(|source| TransportError::Connect { url, source: source.into() })?;

        *self.client.write().await = Some(client);
        Ok(())
    }

    async fn emit(&self, event: &'static str, data: Value) -> Result<()> {
        let guard = self.client.read().await;
        let client = guard.as_ref().ok_or_else(|| TransportError::Emit {
            event: event.to_string(),
            source: anyhow::anyhow!("socket.io client not connected"),
        })?;
        client
            .emit(event, Payload::Text(vec![data]))
            .await
            .map_err(|source| TransportError::Emit { event: event.to_string(), source: source.into() }.into())
    }

    pub async fn emit_connect(&self) -> Result<()> {
        self.emit("connect", serde_json::json!({ "adapter_type": self.adapter_type })).await
    }

    pub async fn emit_disconnect(&self) -> Result<()> {
        self.emit("disconnect", serde_json::json!({ "adapter_type": self.adapter_type })).await
    }

    pub async fn emit_bot_request(&self, event: &IncomingEventPayload) -> Result<()> {
        self.emit(
            "bot_request",
            serde_json::json!({
                "adapter_type": self.adapter_type,
                "event_type": event.event_type(),
                "data": event.data_json(),
            }),
        )
        .await
    }

    pub async fn emit_request_queued(&self, request_id: &str) -> Result<()> {
        self.emit(
            "request_queued",
            serde_json::json!({ "adapter_type": self.adapter_type, "request_id": request_id }),
        )
        .await
    }

    pub async fn emit_request_success(&self, payload: Value) -> Result<()> {
        self.emit("request_success", payload).await
    }

    pub async fn emit_request_failed(&self, payload: Value) -> Result<()> {
        self.emit("request_failed", payload).await
    }

    pub async fn shutdown(&self) {
        let _ = self.emit_disconnect().await;
        if let Some(client) = self.client.write().await.take() {
            let _ = client.disconnect().await;
        }
    }

    /// Background connection monitor. Wakes every `check_interval`, probes
    /// the platform driver's liveness, re-emits `connect` on success. On
    /// sustained failure, retries with exponential backoff up to
    /// `max_reconnect_attempts`; if all fail, emits `disconnect` and sets
    /// `halted` so callers can stop processing until the next success.
    pub async fn run_connection_monitor(
        self: Arc<Self>,
        driver: Arc<dyn PlatformDriver>,
        check_interval: Duration,
        max_reconnect_attempts: u32,
        halted: Arc<AtomicBool>,
    ) {
        loop {
            tokio::time::sleep(check_interval).await;
            if driver.connection_exists().await {
                if let Err(error) = self.emit_connect().await {
                    warn!(%error, "failed to re-emit connect after a successful liveness check");
                }
                halted.store(false, Ordering::SeqCst);
                continue;
            }

            warn!("connection liveness check failed, entering reconnect loop");
            let mut attempt = 0;
            let mut recovered = false;
            while attempt < max_reconnect_attempts {
                tokio::time::sleep(self.backoff_for(attempt)).await;
                if driver.connection_exists().await {
                    recovered = true;
                    break;
                }
                attempt += 1;
            }

            if recovered {
                info!(attempts = attempt, "connection recovered");
                if let Err(error) = self.emit_connect().await {
                    warn!(%error, "failed to emit connect after reconnecting");
                }
                halted.store(false, Ordering::SeqCst);
            } else {
                let error = TransportError::ReconnectExhausted { attempts: max_reconnect_attempts };
                error!(%error, "halting event processing");
                halted.store(true, Ordering::SeqCst);
                if let Err(error) = self.emit_disconnect().await {
                    warn!(%error, "failed to emit disconnect after exhausting reconnect attempts");
                }
            }
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let doubled = self.reconnect_backoff_ms_base.saturating_mul(1u64 << attempt.min(16));
        Duration::from_millis(doubled.min(self.reconnect_backoff_ms_max))
    }
}

fn parse_bot_response(payload: Payload) -> Option<InboundCommand> {
    let value = match payload {
        Payload::Text(mut values) if !values.is_empty() => values.remove(0),
        other => {
            let error = TransportError::MalformedPayload(format!("{other:?}"));
            warn!(%error, "discarding bot_response");
            return None;
        }
    };
    let Some(event_type) = value.get("event_type").and_then(|v| v.as_str()) else {
        let error = TransportError::MalformedPayload("missing event_type".into());
        warn!(%error, "discarding bot_response");
        return None;
    };
    let data = value.get("data").cloned().unwrap_or(Value::Null);
    let request_id = value.get("request_id").and_then(|v| v.as_str()).map(str::to_string);
    Some(InboundCommand {
        event_type: event_type.to_string(),
        data,
        request_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let transport = SocketIoTransport::new("http://localhost:3001", "telegram", 500, 8000);
        assert_eq!(transport.backoff_for(0), Duration::from_millis(500));
        assert_eq!(transport.backoff_for(1), Duration::from_millis(1000));
        assert_eq!(transport.backoff_for(2), Duration::from_millis(2000));
        assert_eq!(transport.backoff_for(10), Duration::from_millis(8000));
    }

    #[test]
    fn parses_well_formed_bot_response() {
        let payload = Payload::Text(vec![serde_json::json!({
            "event_type": "send_message",
            "data": {"conversation_id": "c1", "text": "hi"},
            "request_id": "req-1",
        })]);
        let command = parse_bot_response(payload).expect("should parse");
        assert_eq!(command.event_type, "send_message");
        assert_eq!(command.request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn rejects_payload_missing_event_type() {
        let payload = Payload::Text(vec![serde_json::json!({"data": {}})]);
        assert!(parse_bot_response(payload).is_none());
    }
}
