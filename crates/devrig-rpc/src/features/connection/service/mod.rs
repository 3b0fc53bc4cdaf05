use crate::error::{RpcError, RpcResult};
use crate::features::connection::repo::Duplex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const JSONRPC_VERSION: &str = "2.0";

/// Receives server-initiated calls and notifications.
pub trait NotificationHandler: Send + Sync {
    fn handle_notification(&self, method: &str, params: Value);
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Frame {
    pub fn request(id: u64, method: &str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Value::from(id)),
            method: Some(method.to_string()),
            params: Some(Value::Array(params)),
            ..Self::default()
        }
    }

    pub fn response(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            ..Self::default()
        }
    }
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResult<Value>>>>>;

/// Call/response over a duplex connection. Calls are matched to responses
/// by id; everything the server initiates goes to the notification handler.
pub struct JsonRpcConnection {
    outgoing: mpsc::Sender<String>,
    pending: Pending,
    next_id: AtomicU64,
    call_timeout: Duration,
    reader: JoinHandle<()>,
}

impl JsonRpcConnection {
    pub fn new(
        duplex: Duplex,
        handler: Arc<dyn NotificationHandler>,
        call_timeout: Duration,
    ) -> Self {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn(read_loop(
            duplex.incoming,
            duplex.outgoing.clone(),
            duplex.disconnects,
            pending.clone(),
            handler,
        ));

        Self {
            outgoing: duplex.outgoing,
            pending,
            next_id: AtomicU64::new(1),
            call_timeout,
            reader,
        }
    }

    /// Invokes `method` with positional `params` and waits for the result.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> RpcResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::to_string(&Frame::request(id, method, params))?;

        let (sender, receiver) = oneshot::channel();
        self.pending.lock().await.insert(id, sender);

        if self.outgoing.send(payload).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(RpcError::ConnectionClosed);
        }
        debug!(%method, id, "Sent server call");

        match tokio::time::timeout(self.call_timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    timeout: self.call_timeout,
                })
            }
        }
    }

    pub async fn call_typed<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> RpcResult<R> {
        let value = self.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn pending_calls(&self) -> usize {
        self.pending.lock().await.len()
    }
}

impl Drop for JsonRpcConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn fail_pending(pending: &Pending, error: RpcError) {
    let mut pending = pending.lock().await;
    for (_, sender) in pending.drain() {
        let _ = sender.send(Err(error.clone()));
    }
}

async fn read_loop(
    mut incoming: mpsc::Receiver<String>,
    outgoing: mpsc::Sender<String>,
    mut disconnects: watch::Receiver<u64>,
    pending: Pending,
    handler: Arc<dyn NotificationHandler>,
) {
    let mut watching = true;
    loop {
        let text = tokio::select! {
            text = incoming.recv() => match text {
                Some(text) => text,
                None => break,
            },
            changed = disconnects.changed(), if watching => {
                match changed {
                    Ok(()) => {
                        debug!("Transport dropped, failing calls in flight");
                        fail_pending(&pending, RpcError::Disconnected).await;
                    }
                    Err(_) => watching = false,
                }
                continue;
            }
        };

        let frame: Frame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(error = %error, "Discarding malformed frame");
                continue;
            }
        };

        match (frame.method, frame.id) {
            (Some(method), id) => {
                handler.handle_notification(&method, frame.params.unwrap_or(Value::Null));
                if let Some(id) = id {
                    if let Ok(reply) = serde_json::to_string(&Frame::response(id, Value::Null)) {
                        let _ = outgoing.send(reply).await;
                    }
                }
            }
            (None, Some(id)) => {
                let Some(id) = id.as_u64() else {
                    warn!(%id, "Response with foreign id");
                    continue;
                };
                let result = match frame.error {
                    Some(error) => Err(RpcError::Server {
                        code: error.code,
                        message: error.message,
                    }),
                    None => Ok(frame.result.unwrap_or(Value::Null)),
                };
                match pending.lock().await.remove(&id) {
                    Some(sender) => {
                        let _ = sender.send(result);
                    }
                    None => debug!(id, "Response for abandoned call"),
                }
            }
            (None, None) => warn!("Frame is neither call nor response"),
        }
    }

    fail_pending(&pending, RpcError::ConnectionClosed).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::connection::repo::duplex_pair;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingHandler {
        seen: StdMutex<Vec<(String, Value)>>,
    }

    impl NotificationHandler for RecordingHandler {
        fn handle_notification(&self, method: &str, params: Value) {
            self.seen
                .lock()
                .unwrap()
                .push((method.to_string(), params));
        }
    }

    fn connection(timeout: Duration) -> (JsonRpcConnection, Duplex, Arc<RecordingHandler>) {
        let (client, server) = duplex_pair();
        let handler = Arc::new(RecordingHandler::default());
        (
            JsonRpcConnection::new(client, handler.clone(), timeout),
            server,
            handler,
        )
    }

    async fn next_frame(server: &mut Duplex) -> Frame {
        serde_json::from_str(&server.incoming.recv().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_call_matches_response_by_id() {
        let (connection, mut server, _) = connection(Duration::from_secs(5));

        let server_task = tokio::spawn(async move {
            let frame = next_frame(&mut server).await;
            assert_eq!(frame.method.as_deref(), Some("getApplication"));
            assert_eq!(frame.params, Some(json!(["red-fox-12345678"])));
            let reply = Frame::response(frame.id.unwrap(), json!({ "ok": true }));
            server
                .outgoing
                .send(serde_json::to_string(&reply).unwrap())
                .await
                .unwrap();
            server
        });

        let result = connection
            .call("getApplication", vec![json!("red-fox-12345678")])
            .await
            .unwrap();
        assert_eq!(result, json!({ "ok": true }));
        server_task.await.unwrap();
        assert_eq!(connection.pending_calls().await, 0);
    }

    #[tokio::test]
    async fn test_server_error_is_surfaced() {
        let (connection, mut server, _) = connection(Duration::from_secs(5));

        tokio::spawn(async move {
            let frame = next_frame(&mut server).await;
            let reply = Frame {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id: frame.id,
                error: Some(ErrorObject {
                    code: 404,
                    message: "application not found".to_string(),
                    data: None,
                }),
                ..Frame::default()
            };
            server
                .outgoing
                .send(serde_json::to_string(&reply).unwrap())
                .await
                .unwrap();
            server
        });

        let err = connection
            .call("stopApplication", vec![json!("missing")])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_times_out_and_forgets_pending() {
        let (connection, _server, _) = connection(Duration::from_secs(2));

        let err = connection.call("getLoggedInUser", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout { .. }));
        assert_eq!(connection.pending_calls().await, 0);
    }

    #[tokio::test]
    async fn test_closed_connection_fails_pending_calls() {
        let (connection, server, _) = connection(Duration::from_secs(30));

        let closer = tokio::spawn(async move {
            let mut server = server;
            let _ = server.incoming.recv().await;
            drop(server);
        });

        let err = connection.call("getApplications", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed));
        closer.await.unwrap();
    }

    #[tokio::test]
    async fn test_transport_drop_fails_calls_in_flight() {
        let (client_tx, mut server_rx) = mpsc::channel(8);
        let (server_tx, client_rx) = mpsc::channel::<String>(8);
        let (duplex, drops) = Duplex::new(client_tx, client_rx);
        let connection = Arc::new(JsonRpcConnection::new(
            duplex,
            Arc::new(RecordingHandler::default()),
            Duration::from_secs(60),
        ));

        let in_flight = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.call("getApplications", vec![]).await })
        };
        server_rx.recv().await.unwrap();
        drops.send_modify(|count| *count += 1);

        let err = in_flight.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::Disconnected));
        assert_eq!(connection.pending_calls().await, 0);

        // Calls after the reconnect still get answers.
        let next = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.call("getLoggedInUser", vec![]).await })
        };
        let frame: Frame = serde_json::from_str(&server_rx.recv().await.unwrap()).unwrap();
        let reply = Frame::response(frame.id.unwrap(), json!({ "id": "user-1" }));
        server_tx
            .send(serde_json::to_string(&reply).unwrap())
            .await
            .unwrap();
        assert_eq!(next.await.unwrap().unwrap(), json!({ "id": "user-1" }));
    }

    #[tokio::test]
    async fn test_server_calls_reach_handler_and_get_acknowledged() {
        let (_connection, mut server, handler) = connection(Duration::from_secs(5));

        let call = json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "onInstanceUpdate",
            "params": [{ "id": "inst-1" }]
        });
        server.outgoing.send(call.to_string()).await.unwrap();

        let ack = next_frame(&mut server).await;
        assert_eq!(ack.id, Some(json!(7)));
        assert!(ack.error.is_none());

        let seen = handler.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "onInstanceUpdate");
    }
}
