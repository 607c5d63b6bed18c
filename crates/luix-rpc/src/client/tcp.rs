//! TCP requester with one connection per provider address

use super::Requester;
use crate::codec::{Codec, FrameHeader, read_frame};
use crate::config::{DEFAULT_MAX_CONTENT_LENGTH, DEFAULT_REQUEST_TIMEOUT_MS};
use crate::error::{Error, Result};
use crate::future::ResponseFuture;
use crate::message::{DECODE_FAILED, Message, Request, Response};
use crate::serializer::Serializer;
use async_net::TcpStream;
use async_trait::async_trait;
use futures::AsyncWriteExt;
use futures::lock::Mutex as AsyncMutex;
use luix_registry::{Spawner, Url, spawn::sleep, sync::lock, url::keys};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

type InFlight = Arc<Mutex<HashMap<u64, ResponseFuture>>>;

struct Connection {
    address: String,
    stream: TcpStream,
    writer: AsyncMutex<TcpStream>,
    in_flight: InFlight,
    alive: AtomicBool,
}

impl Connection {
    fn complete(&self, response: Response) {
        let future = lock(&self.in_flight).remove(&response.request_id);
        let Some(future) = future else {
            debug!(
                "Dropping late response {} from {}",
                response.request_id, self.address
            );
            return;
        };
        match response.exception {
            Some(exception) if exception.kind == DECODE_FAILED => {
                future.on_failure(Error::Decode(format!(
                    "{} could not decode request {}: {}",
                    self.address, response.request_id, exception.message
                )))
            }
            Some(exception) => future.on_failure(Error::Remote(exception)),
            None => future.on_success(response.result.unwrap_or(Value::Null)),
        };
    }

    /// Fail the request a frame answered when its body does not decode
    fn fail_frame(&self, frame: &[u8], error: Error) {
        let header = match FrameHeader::parse(frame) {
            Ok(header) if header.is_response() && !header.is_heartbeat() => header,
            _ => {
                warn!("Discarding frame from {}: {}", self.address, error);
                return;
            }
        };
        let future = lock(&self.in_flight).remove(&header.request_id);
        match future {
            Some(future) => {
                warn!(
                    "Response {} from {} does not decode: {}",
                    header.request_id, self.address, error
                );
                future.on_failure(error);
            }
            None => debug!(
                "Discarding undecodable late response {} from {}: {}",
                header.request_id, self.address, error
            ),
        }
    }

    fn fail_all(&self, reason: &str) {
        self.alive.store(false, Ordering::Release);
        let pending: Vec<ResponseFuture> = lock(&self.in_flight).drain().map(|(_, f)| f).collect();
        if !pending.is_empty() {
            warn!(
                "Connection to {} lost ({}), failing {} requests",
                self.address,
                reason,
                pending.len()
            );
        }
        for future in pending {
            future.on_failure(Error::network(format!(
                "connection to {} lost: {}",
                self.address, reason
            )));
        }
    }
}

/// Requester over `async-net`
pub struct TcpRequester {
    codec: Arc<dyn Codec>,
    serializer: Arc<dyn Serializer>,
    spawner: Arc<dyn Spawner>,
    max_content_length: usize,
    default_timeout_ms: u64,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
    /// Serializes connection attempts per address
    connecting: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    connected_once: Mutex<HashSet<String>>,
}

impl TcpRequester {
    /// Create a requester; limits and timeouts come from the consumer URL
    pub fn new(
        url: &Url,
        codec: Arc<dyn Codec>,
        serializer: Arc<dyn Serializer>,
        spawner: Arc<dyn Spawner>,
    ) -> Self {
        Self {
            codec,
            serializer,
            spawner,
            max_content_length: url.option_usize(keys::MAX_PAYLOAD, DEFAULT_MAX_CONTENT_LENGTH),
            default_timeout_ms: url.option_u64(keys::REQUEST_TIMEOUT, DEFAULT_REQUEST_TIMEOUT_MS),
            connections: Mutex::new(HashMap::new()),
            connecting: Mutex::new(HashMap::new()),
            connected_once: Mutex::new(HashSet::new()),
        }
    }

    fn live_connection(&self, address: &str) -> Option<Arc<Connection>> {
        lock(&self.connections)
            .get(address)
            .filter(|c| c.alive.load(Ordering::Acquire))
            .cloned()
    }

    async fn connection(&self, address: &str, timeout: Duration) -> Result<Arc<Connection>> {
        if let Some(connection) = self.live_connection(address) {
            return Ok(connection);
        }
        let connecting = lock(&self.connecting)
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _connecting = connecting.lock().await;
        if let Some(connection) = self.live_connection(address) {
            return Ok(connection);
        }

        let attempt = smol::future::or(
            async { Some(TcpStream::connect(address).await) },
            async {
                sleep(timeout).await;
                None
            },
        )
        .await;
        let outcome = match attempt {
            Some(Ok(stream)) => Ok(stream),
            Some(Err(e)) => Err(e.to_string()),
            None => Err(format!("no answer within {}ms", timeout.as_millis())),
        };
        let stream = match outcome {
            Ok(stream) => stream,
            Err(reason) if lock(&self.connected_once).contains(address) => {
                return Err(Error::network(format!(
                    "Failed to reconnect to {}: {}",
                    address, reason
                )));
            }
            Err(reason) => {
                return Err(Error::Initialization(format!(
                    "Failed to connect to {}: {}",
                    address, reason
                )));
            }
        };
        lock(&self.connected_once).insert(address.to_string());
        info!("Connected to provider at {}", address);

        let connection = Arc::new(Connection {
            address: address.to_string(),
            stream: stream.clone(),
            writer: AsyncMutex::new(stream.clone()),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            alive: AtomicBool::new(true),
        });
        self.spawner.spawn(Box::pin(read_responses(
            stream,
            connection.clone(),
            self.codec.clone(),
            self.serializer.clone(),
            self.max_content_length,
        )));

        lock(&self.connections).insert(address.to_string(), connection.clone());
        Ok(connection)
    }
}

async fn read_responses(
    mut reader: TcpStream,
    connection: Arc<Connection>,
    codec: Arc<dyn Codec>,
    serializer: Arc<dyn Serializer>,
    max_content_length: usize,
) {
    let reason = loop {
        let frame = match read_frame(&mut reader, max_content_length).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break "closed by peer".to_string(),
            Err(e) => break e.to_string(),
        };
        match codec.decode(
            &connection.address,
            &frame,
            serializer.as_ref(),
            max_content_length,
        ) {
            Ok(Message::Response(response)) => connection.complete(response),
            Ok(Message::Heartbeat { .. }) => {}
            Ok(other) => debug!("Ignoring {:?} from {}", other, connection.address),
            Err(e) => connection.fail_frame(&frame, e),
        }
    };
    connection.fail_all(&reason);
}

#[async_trait]
impl Requester for TcpRequester {
    async fn send(&self, provider: &Url, request: Request) -> Result<ResponseFuture> {
        let request_id = request.request_id;
        let timeout = request.option_u64(keys::REQUEST_TIMEOUT, self.default_timeout_ms);
        let timeout = Duration::from_millis(timeout);
        let connection = self.connection(&provider.address(), timeout).await?;

        let future = ResponseFuture::new(request_id, timeout);
        lock(&connection.in_flight).insert(request_id, future.clone());
        let in_flight = connection.in_flight.clone();
        future.add_listener(move |done| {
            lock(&in_flight).remove(&done.request_id());
        });

        let frame = self
            .codec
            .encode(&Message::Request(request), self.serializer.as_ref())
            .inspect_err(|_| {
                lock(&connection.in_flight).remove(&request_id);
            })?;

        let mut writer = connection.writer.lock().await;
        let written = match writer.write_all(&frame).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            drop(writer);
            lock(&connection.in_flight).remove(&request_id);
            connection.alive.store(false, Ordering::Release);
            return Err(Error::network(format!(
                "Failed to send request {} to {}: {}",
                request_id, connection.address, e
            )));
        }
        debug!("Sent request {} to {}", request_id, connection.address);
        Ok(future)
    }

    fn close(&self) {
        // Shutting the sockets down ends each reader task, which fails the
        // requests still in flight.
        for (_, connection) in lock(&self.connections).drain() {
            connection.alive.store(false, Ordering::Release);
            let _ = connection.stream.shutdown(std::net::Shutdown::Both);
        }
    }
}

impl Drop for TcpRequester {
    fn drop(&mut self) {
        self.close();
    }
}
