//! TCP server speaking the frame codec
//!
//! Connections are read on their own task. Decoded requests are queued on a
//! bounded work queue drained by `maxThreads` workers; when the queue is full
//! the request is answered right away with a rejection instead of growing the
//! backlog.

use super::{MessageHandler, Server};
use crate::codec::{Codec, FrameHeader, read_frame};
use crate::config::{
    DEFAULT_MAX_CONTENT_LENGTH, DEFAULT_MAX_SERVER_CONNECTIONS, DEFAULT_MAX_THREADS,
    DEFAULT_WORK_QUEUE_SIZE,
};
use crate::error::{Error, Result};
use crate::message::{DECODE_FAILED, Message, RemoteError, Response};
use crate::serializer::Serializer;
use async_channel::{Receiver, Sender};
use async_net::{TcpListener, TcpStream};
use async_trait::async_trait;
use futures::AsyncWriteExt;
use futures::lock::Mutex as AsyncMutex;
use luix_registry::{
    Spawner, Url,
    spawn::BoxTask,
    sync::lock,
    url::keys,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Remote error kind returned when the work queue is full
pub const REJECTED: &str = "RejectedExecution";

/// Everything a connection task needs
struct Dispatch {
    handler: Arc<dyn MessageHandler>,
    codec: Arc<dyn Codec>,
    serializer: Arc<dyn Serializer>,
    spawner: Arc<dyn Spawner>,
    max_content_length: usize,
    max_connections: usize,
    connections: AtomicUsize,
}

/// Handles of a bound server
struct Running {
    local_addr: SocketAddr,
    shutdown: Sender<()>,
    jobs: Sender<BoxTask>,
}

/// Frame codec server over `async-net`
pub struct TcpServer {
    url: Url,
    dispatch: Arc<Dispatch>,
    workers: usize,
    queue_size: usize,
    opening: AsyncMutex<()>,
    running: Mutex<Option<Running>>,
    closed: AtomicBool,
}

impl TcpServer {
    /// Create an unbound server; sizing comes from the URL options
    pub fn new(
        url: Url,
        handler: Arc<dyn MessageHandler>,
        codec: Arc<dyn Codec>,
        serializer: Arc<dyn Serializer>,
        spawner: Arc<dyn Spawner>,
    ) -> Self {
        let dispatch = Dispatch {
            handler,
            codec,
            serializer,
            spawner,
            max_content_length: url.option_usize(keys::MAX_PAYLOAD, DEFAULT_MAX_CONTENT_LENGTH),
            max_connections: url
                .option_usize(keys::MAX_SERVER_CONNECTIONS, DEFAULT_MAX_SERVER_CONNECTIONS),
            connections: AtomicUsize::new(0),
        };
        Self {
            workers: url.option_usize(keys::MAX_THREADS, DEFAULT_MAX_THREADS).max(1),
            queue_size: url
                .option_usize(keys::WORK_QUEUE_SIZE, DEFAULT_WORK_QUEUE_SIZE)
                .max(1),
            url,
            dispatch: Arc::new(dispatch),
            opening: AsyncMutex::new(()),
            running: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.dispatch.connections.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Server for TcpServer {
    fn url(&self) -> &Url {
        &self.url
    }

    async fn open(&self) -> Result<()> {
        let _opening = self.opening.lock().await;
        if self.is_closed() {
            return Err(Error::Initialization(format!(
                "Server {} is closed",
                self.url.address()
            )));
        }
        if self.is_bound() {
            return Ok(());
        }

        let address = self.url.address();
        let listener = TcpListener::bind(address.as_str()).await.map_err(|e| {
            Error::Initialization(format!("Failed to bind {}: {}", address, e))
        })?;
        let local_addr = listener.local_addr()?;

        let (jobs, queue) = async_channel::bounded::<BoxTask>(self.queue_size);
        for _ in 0..self.workers {
            let queue = queue.clone();
            self.dispatch.spawner.spawn(Box::pin(async move {
                while let Ok(job) = queue.recv().await {
                    job.await;
                }
            }));
        }

        let (shutdown, shutdown_signal) = async_channel::bounded::<()>(1);
        let dispatch = self.dispatch.clone();
        let accept_jobs = jobs.clone();
        self.dispatch.spawner.spawn(Box::pin(async move {
            accept_loop(listener, dispatch, accept_jobs, shutdown_signal).await;
        }));

        info!("Server for {} listening on {}", self.url, local_addr);
        *lock(&self.running) = Some(Running {
            local_addr,
            shutdown,
            jobs,
        });
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(running) = lock(&self.running).take() {
            running.shutdown.close();
            running.jobs.close();
            info!("Server on {} closed", running.local_addr);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn is_bound(&self) -> bool {
        lock(&self.running).is_some()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.running).as_ref().map(|r| r.local_addr)
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.close();
    }
}

enum Accepted {
    Connection(std::io::Result<(TcpStream, SocketAddr)>),
    Shutdown,
}

async fn accept_loop(
    listener: TcpListener,
    dispatch: Arc<Dispatch>,
    jobs: Sender<BoxTask>,
    shutdown: Receiver<()>,
) {
    loop {
        let accepted = smol::future::or(
            async { Accepted::Connection(listener.accept().await) },
            async {
                let _ = shutdown.recv().await;
                Accepted::Shutdown
            },
        )
        .await;

        match accepted {
            Accepted::Shutdown => break,
            Accepted::Connection(Ok((stream, peer))) => {
                if dispatch.connections.load(Ordering::Acquire) >= dispatch.max_connections {
                    warn!(
                        "Refusing connection from {}: {} connections open",
                        peer, dispatch.max_connections
                    );
                    drop(stream);
                    continue;
                }
                dispatch.connections.fetch_add(1, Ordering::AcqRel);
                debug!("Accepted connection from {}", peer);

                let connection = serve_connection(
                    stream,
                    peer.to_string(),
                    dispatch.clone(),
                    jobs.clone(),
                    shutdown.clone(),
                );
                dispatch.spawner.spawn(Box::pin(connection));
            }
            Accepted::Connection(Err(e)) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
    debug!("Accept loop stopped");
}

async fn serve_connection(
    stream: TcpStream,
    peer: String,
    dispatch: Arc<Dispatch>,
    jobs: Sender<BoxTask>,
    shutdown: Receiver<()>,
) {
    let writer = Arc::new(AsyncMutex::new(stream.clone()));
    let mut reader = stream;

    loop {
        let next = smol::future::or(
            async { Some(read_frame(&mut reader, dispatch.max_content_length).await) },
            async {
                let _ = shutdown.recv().await;
                None
            },
        )
        .await;

        let frame = match next {
            Some(Ok(Some(frame))) => frame,
            Some(Ok(None)) | None => break,
            Some(Err(e)) => {
                warn!("Dropping connection from {}: {}", peer, e);
                break;
            }
        };

        let message = match dispatch.codec.decode(
            &peer,
            &frame,
            dispatch.serializer.as_ref(),
            dispatch.max_content_length,
        ) {
            Ok(message) => message,
            Err(e) => {
                reject_undecodable(&writer, &dispatch, &frame, e, &peer).await;
                continue;
            }
        };

        match message {
            Message::Heartbeat {
                request_id,
                response: false,
            } => {
                let pong = Message::Heartbeat {
                    request_id,
                    response: true,
                };
                write_message(&writer, &dispatch, &pong, &peer).await;
            }
            Message::Request(request) => {
                let request_id = request.request_id;
                let job_dispatch = dispatch.clone();
                let job_writer = writer.clone();
                let job_peer = peer.clone();
                let job: BoxTask = Box::pin(async move {
                    let response = job_dispatch.handler.handle(request).await;
                    write_message(
                        &job_writer,
                        &job_dispatch,
                        &Message::Response(response),
                        &job_peer,
                    )
                    .await;
                });

                if jobs.try_send(job).is_err() {
                    warn!("Work queue full, rejecting request {} from {}", request_id, peer);
                    let rejection = Response::failure(
                        request_id,
                        RemoteError::new(REJECTED, "server work queue is full"),
                    );
                    write_message(&writer, &dispatch, &Message::Response(rejection), &peer).await;
                }
            }
            other => debug!("Ignoring {:?} from {}", other, peer),
        }
    }

    let _ = reader.shutdown(std::net::Shutdown::Both);
    dispatch.connections.fetch_sub(1, Ordering::AcqRel);
    debug!("Connection from {} closed", peer);
}

/// Answer a request whose body does not decode, so the caller fails fast
async fn reject_undecodable(
    writer: &AsyncMutex<TcpStream>,
    dispatch: &Dispatch,
    frame: &[u8],
    error: Error,
    peer: &str,
) {
    match FrameHeader::parse(frame) {
        Ok(header) if !header.is_response() && !header.is_heartbeat() => {
            warn!(
                "Request {} from {} does not decode: {}",
                header.request_id, peer, error
            );
            let failure = Response::failure(
                header.request_id,
                RemoteError::new(DECODE_FAILED, error.to_string()),
            );
            write_message(writer, dispatch, &Message::Response(failure), peer).await;
        }
        _ => warn!("Discarding frame from {}: {}", peer, error),
    }
}

async fn write_message(
    writer: &AsyncMutex<TcpStream>,
    dispatch: &Dispatch,
    message: &Message,
    peer: &str,
) {
    let frame = match dispatch
        .codec
        .encode(message, dispatch.serializer.as_ref())
    {
        Ok(frame) => frame,
        Err(e) => {
            error!("Failed to encode reply {} for {}: {}", message.request_id(), peer, e);
            return;
        }
    };

    let mut stream = writer.lock().await;
    if let Err(e) = stream.write_all(&frame).await {
        debug!("Failed to write to {}: {}", peer, e);
        return;
    }
    let _ = stream.flush().await;
}
