//! WebSocket implementation of [`RelayTransport`].
//!
//! One socket per relay, opened lazily. Each socket gets a reader task that
//! routes relay messages (OK to waiting publishers, EVENT/EOSE to the owning
//! subscription) and a writer task fed through a channel. Dials to different
//! relays proceed independently; dials to the same relay are serialized.

use crate::message::{ClientMessage, Filter, RelayMessage};
use crate::subscription::generate_subscription_id;
use crate::transport::{
    ConnectionDropped, RelayTransport, StreamItem, StreamSender, TransportError,
};
use async_trait::async_trait;
use forum::Event;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::{TcpStream, lookup_host};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type AckSender = oneshot::Sender<(bool, String)>;

/// State shared between a connection handle and its reader task.
#[derive(Default)]
struct Routes {
    acks: Mutex<HashMap<String, AckSender>>,
    streams: Mutex<HashMap<String, StreamSender>>,
    closed: AtomicBool,
}

impl Routes {
    /// Returns true for the call that actually closed the routes.
    fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        // Dropping the senders wakes every waiter with a closed channel
        self.acks.lock().clear();
        self.streams.lock().clear();
        first
    }
}

/// Shared by the reader and writer tasks of one connection.
struct Session {
    url: String,
    routes: Arc<Routes>,
    dropped_tx: broadcast::Sender<ConnectionDropped>,
}

impl Session {
    /// Close the routes and report the drop, once per connection.
    fn dropped(&self, error: TransportError) {
        if self.routes.close() {
            info!("Disconnected from relay {}: {}", self.url, error);
            let _ = self.dropped_tx.send(ConnectionDropped {
                url: self.url.clone(),
                error,
            });
        }
    }
}

struct Connection {
    message_tx: mpsc::Sender<Message>,
    routes: Arc<Routes>,
    inbox_task: JoinHandle<()>,
    outbox_task: JoinHandle<()>,
}

impl Connection {
    fn is_open(&self) -> bool {
        !self.routes.closed.load(Ordering::SeqCst)
    }

    async fn send(&self, message: &ClientMessage) -> Result<(), TransportError> {
        let json = message
            .to_json()
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.message_tx
            .send(Message::text(json))
            .await
            .map_err(|_| TransportError::Closed("writer stopped".to_string()))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.inbox_task.abort();
        self.outbox_task.abort();
        let _ = self.routes.close();
    }
}

/// Removes a query's route when the query finishes or is cancelled.
struct QueryGuard {
    subscription_id: String,
    connection: Arc<Connection>,
}

impl Drop for QueryGuard {
    fn drop(&mut self) {
        self.connection.routes.streams.lock().remove(&self.subscription_id);
        if let Ok(json) = (ClientMessage::Close {
            subscription_id: self.subscription_id.clone(),
        })
        .to_json()
        {
            let _ = self.connection.message_tx.try_send(Message::text(json));
        }
    }
}

/// Relay transport over tokio-tungstenite.
pub struct WebSocketTransport {
    connect_timeout: Duration,
    publish_timeout: Duration,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
    /// One dial at a time per relay
    dial_gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    dropped_tx: broadcast::Sender<ConnectionDropped>,
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration, publish_timeout: Duration) -> Self {
        let (dropped_tx, _) = broadcast::channel(100);
        Self {
            connect_timeout,
            publish_timeout,
            connections: Mutex::new(HashMap::new()),
            dial_gates: Mutex::new(HashMap::new()),
            dropped_tx,
        }
    }

    fn open_connection(&self, url: &str) -> Option<Arc<Connection>> {
        self.connections
            .lock()
            .get(url)
            .filter(|connection| connection.is_open())
            .cloned()
    }

    /// The open connection for `url`, connecting if needed.
    async fn connection(&self, url: &str) -> Result<Arc<Connection>, TransportError> {
        if let Some(connection) = self.open_connection(url) {
            return Ok(connection);
        }

        let gate = self
            .dial_gates
            .lock()
            .entry(url.to_string())
            .or_default()
            .clone();
        let _dialing = gate.lock().await;

        // Another caller may have finished dialing while we waited
        if let Some(connection) = self.open_connection(url) {
            return Ok(connection);
        }

        let connection = Arc::new(self.open(url).await?);
        self.connections
            .lock()
            .insert(url.to_string(), connection.clone());
        Ok(connection)
    }

    async fn open(&self, url: &str) -> Result<Connection, TransportError> {
        resolve(url).await?;

        let (ws_stream, _response) = timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                TransportError::Timeout(format!(
                    "connection timed out after {:?}",
                    self.connect_timeout
                ))
            })?
            .map_err(|e| TransportError::from_message(e.to_string()))?;

        let (write, read) = ws_stream.split();
        let (message_tx, message_rx) = mpsc::channel::<Message>(100);
        let routes = Arc::new(Routes::default());
        let session = Arc::new(Session {
            url: url.to_string(),
            routes: routes.clone(),
            dropped_tx: self.dropped_tx.clone(),
        });

        let inbox_task = tokio::spawn(inbox_loop(read, session.clone()));
        let outbox_task = tokio::spawn(outbox_loop(write, message_rx, session));

        info!("Connected to relay {}", url);
        Ok(Connection {
            message_tx,
            routes,
            inbox_task,
            outbox_task,
        })
    }
}

/// Resolve the relay host up front so DNS failures are told apart from
/// unreachable servers.
async fn resolve(url: &str) -> Result<(), TransportError> {
    let parsed = Url::parse(url).map_err(|e| TransportError::Protocol(e.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| TransportError::Resolution(format!("{}: missing host", url)))?;
    let port = parsed.port_or_known_default().unwrap_or(443);

    match lookup_host(format!("{}:{}", host, port)).await {
        Ok(mut addrs) => match addrs.next() {
            Some(_) => Ok(()),
            None => Err(TransportError::Resolution(format!("{}: no addresses returned", host))),
        },
        Err(e) => Err(TransportError::Resolution(format!("{}: {}", host, e))),
    }
}

async fn inbox_loop(mut read: SplitStream<Socket>, session: Arc<Session>) {
    let url = session.url.as_str();
    let routes = &session.routes;
    let reason = loop {
        let Some(result) = read.next().await else {
            break TransportError::Closed(format!("{}: stream ended", url));
        };
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                debug!("Relay {} sent close frame", url);
                break TransportError::Closed(format!("{}: close frame", url));
            }
            Ok(_) => continue,
            Err(e) => {
                warn!("Relay {} read error: {}", url, e);
                break TransportError::from_message(e.to_string());
            }
        };

        match RelayMessage::from_json(text.as_str()) {
            Ok(RelayMessage::Event {
                subscription_id,
                event,
            }) => {
                if let Some(sink) = routes.streams.lock().get(&subscription_id) {
                    let _ = sink.send(StreamItem::Event(event));
                }
            }
            Ok(RelayMessage::Eose { subscription_id }) => {
                if let Some(sink) = routes.streams.lock().get(&subscription_id) {
                    let _ = sink.send(StreamItem::Eose);
                }
            }
            Ok(RelayMessage::Ok {
                event_id,
                success,
                message,
            }) => {
                if let Some(ack) = routes.acks.lock().remove(&event_id) {
                    let _ = ack.send((success, message));
                }
            }
            Ok(RelayMessage::Closed {
                subscription_id,
                message,
            }) => {
                debug!("Relay {} closed subscription {}: {}", url, subscription_id, message);
                routes.streams.lock().remove(&subscription_id);
            }
            Ok(RelayMessage::Notice { message }) => {
                debug!("Notice from {}: {}", url, message);
            }
            Err(e) => {
                debug!("Ignoring malformed message from {}: {}", url, e);
            }
        }
    };

    session.dropped(reason);
}

async fn outbox_loop(
    mut write: SplitSink<Socket, Message>,
    mut message_rx: mpsc::Receiver<Message>,
    session: Arc<Session>,
) {
    while let Some(message) = message_rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = write.send(message).await {
            warn!("Relay {} write error: {}", session.url, e);
            session.dropped(TransportError::from_message(e.to_string()));
            break;
        }
        if closing {
            break;
        }
    }
}

#[async_trait]
impl RelayTransport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        self.connection(url).await.map(|_| ())
    }

    async fn disconnect(&self, url: &str) {
        let connection = self.connections.lock().remove(url);
        if let Some(connection) = connection {
            // Closed before the frame goes out so the reader does not report it
            let _ = connection.routes.close();
            let _ = connection.message_tx.send(Message::Close(None)).await;
        }
    }

    async fn publish(&self, url: &str, event: &Event) -> Result<(), TransportError> {
        let connection = self.connection(url).await?;
        let (tx, rx) = oneshot::channel();
        connection.routes.acks.lock().insert(event.id.clone(), tx);

        if let Err(e) = connection.send(&ClientMessage::Event(event.clone())).await {
            connection.routes.acks.lock().remove(&event.id);
            return Err(e);
        }

        match timeout(self.publish_timeout, rx).await {
            Ok(Ok((true, _))) => Ok(()),
            Ok(Ok((false, message))) => Err(TransportError::Rejected(message)),
            Ok(Err(_)) => Err(TransportError::Closed(format!(
                "connection to {} closed before acknowledgement",
                url
            ))),
            Err(_) => {
                connection.routes.acks.lock().remove(&event.id);
                Err(TransportError::Timeout(format!(
                    "no acknowledgement from {} after {:?}",
                    url, self.publish_timeout
                )))
            }
        }
    }

    async fn query(&self, url: &str, filters: &[Filter]) -> Result<Vec<Event>, TransportError> {
        let connection = self.connection(url).await?;
        let subscription_id = generate_subscription_id();
        let (tx, mut rx) = mpsc::unbounded_channel();
        connection
            .routes
            .streams
            .lock()
            .insert(subscription_id.clone(), tx);
        let _guard = QueryGuard {
            subscription_id: subscription_id.clone(),
            connection: connection.clone(),
        };

        connection
            .send(&ClientMessage::Req {
                subscription_id,
                filters: filters.to_vec(),
            })
            .await?;

        let mut events = Vec::new();
        while let Some(item) = rx.recv().await {
            match item {
                StreamItem::Event(event) => events.push(event),
                StreamItem::Eose => break,
            }
        }
        Ok(events)
    }

    async fn subscribe(
        &self,
        url: &str,
        subscription_id: &str,
        filters: &[Filter],
        sink: StreamSender,
    ) -> Result<(), TransportError> {
        let connection = self.connection(url).await?;
        connection
            .routes
            .streams
            .lock()
            .insert(subscription_id.to_string(), sink);

        let result = connection
            .send(&ClientMessage::Req {
                subscription_id: subscription_id.to_string(),
                filters: filters.to_vec(),
            })
            .await;
        if result.is_err() {
            connection.routes.streams.lock().remove(subscription_id);
        }
        result
    }

    fn dropped_connections(&self) -> Option<broadcast::Receiver<ConnectionDropped>> {
        Some(self.dropped_tx.subscribe())
    }

    async fn unsubscribe(&self, url: &str, subscription_id: &str) {
        let connection = self.connections.lock().get(url).cloned();
        let Some(connection) = connection else {
            return;
        };
        connection.routes.streams.lock().remove(subscription_id);
        if connection.is_open() {
            let _ = connection
                .send(&ClientMessage::Close {
                    subscription_id: subscription_id.to_string(),
                })
                .await;
        }
    }
}
