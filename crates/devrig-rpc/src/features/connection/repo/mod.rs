use crate::error::{RpcError, RpcResult};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

const CHANNEL_BUFFER: usize = 64;

/// Text frames in both directions of a connection. The connection survives
/// reconnects of the underlying transport.
pub struct Duplex {
    pub outgoing: mpsc::Sender<String>,
    pub incoming: mpsc::Receiver<String>,
    /// Counts transport drops. Responses to frames sent before a drop never
    /// arrive.
    pub disconnects: watch::Receiver<u64>,
}

impl Duplex {
    /// Wraps both directions. The returned sender reports transport drops.
    pub fn new(
        outgoing: mpsc::Sender<String>,
        incoming: mpsc::Receiver<String>,
    ) -> (Self, watch::Sender<u64>) {
        let (signal, disconnects) = watch::channel(0);
        (
            Self {
                outgoing,
                incoming,
                disconnects,
            },
            signal,
        )
    }
}

/// Two connected in-process ends that never drop.
pub fn duplex_pair() -> (Duplex, Duplex) {
    let (left_tx, right_rx) = mpsc::channel(CHANNEL_BUFFER);
    let (right_tx, left_rx) = mpsc::channel(CHANNEL_BUFFER);
    (
        Duplex::new(left_tx, left_rx).0,
        Duplex::new(right_tx, right_rx).0,
    )
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Websocket transport that redials the server whenever the socket drops.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    endpoint: Url,
    token: Option<String>,
    reconnect_interval: Duration,
}

impl WebSocketTransport {
    pub fn new(endpoint: &str) -> RpcResult<Self> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| RpcError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(RpcError::InvalidEndpoint(format!(
                "unsupported scheme '{}'",
                endpoint.scheme()
            )));
        }
        if endpoint.host_str().is_none() {
            return Err(RpcError::InvalidEndpoint(format!("{endpoint}: missing host")));
        }

        Ok(Self {
            endpoint,
            token: None,
            reconnect_interval: Duration::from_secs(1),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Browser-style origin of the endpoint, e.g. `https://app.example.com`.
    pub fn origin(&self) -> String {
        let scheme = if self.endpoint.scheme() == "wss" {
            "https"
        } else {
            "http"
        };
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{scheme}://{host}:{port}"),
            None => format!("{scheme}://{host}"),
        }
    }

    fn request(&self) -> RpcResult<Request> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| RpcError::InvalidEndpoint(e.to_string()))?;

        let origin = HeaderValue::from_str(&self.origin())
            .map_err(|e| RpcError::InvalidEndpoint(e.to_string()))?;
        request.headers_mut().insert("origin", origin);

        if let Some(token) = &self.token {
            let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| RpcError::InvalidEndpoint(format!("invalid token: {e}")))?;
            request.headers_mut().insert("authorization", bearer);
        }

        Ok(request)
    }

    async fn dial(&self) -> RpcResult<Socket> {
        let (socket, _) = connect_async(self.request()?)
            .await
            .map_err(|e| RpcError::Connection(e.to_string()))?;
        Ok(socket)
    }

    /// Dials the server once and fails fast if that does not work. Later
    /// disconnects are retried in the background until `cancel` fires.
    pub async fn connect(self, cancel: CancellationToken) -> RpcResult<Duplex> {
        let socket = self.dial().await?;
        info!(endpoint = %self.endpoint, "Connected to server");

        let (outgoing, outbound) = mpsc::channel(CHANNEL_BUFFER);
        let (inbound, incoming) = mpsc::channel(CHANNEL_BUFFER);
        let (duplex, disconnects) = Duplex::new(outgoing, incoming);
        tokio::spawn(self.pump(socket, outbound, inbound, disconnects, cancel));

        Ok(duplex)
    }

    async fn pump(
        self,
        mut socket: Socket,
        mut outbound: mpsc::Receiver<String>,
        inbound: mpsc::Sender<String>,
        disconnects: watch::Sender<u64>,
        cancel: CancellationToken,
    ) {
        loop {
            let disconnected = loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = socket.close(None).await;
                        return;
                    }
                    message = outbound.recv() => match message {
                        Some(text) => {
                            if let Err(error) = socket.send(Message::Text(text)).await {
                                break error.to_string();
                            }
                        }
                        None => {
                            let _ = socket.close(None).await;
                            return;
                        }
                    },
                    frame = socket.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            if inbound.send(text).await.is_err() {
                                let _ = socket.close(None).await;
                                return;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break "closed by server".to_string(),
                        Some(Ok(_)) => {}
                        Some(Err(error)) => break error.to_string(),
                    },
                }
            };

            warn!(endpoint = %self.endpoint, reason = %disconnected, "Server connection lost, reconnecting");
            disconnects.send_modify(|count| *count += 1);

            socket = loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(self.reconnect_interval) => {}
                }
                match self.dial().await {
                    Ok(socket) => break socket,
                    Err(error) => debug!(error = %error, "Reconnect attempt failed"),
                }
            };
            info!(endpoint = %self.endpoint, "Reconnected to server");
        }
    }
}
