//! Host-local publish/subscribe transport for step events.
//!
//! One producer process owns an [`EventBus`] bound to a local socket; any
//! number of subscriber processes attach with an [`EventSubscriber`]. Frames
//! are length-delimited JSON [`WireEvent`]s. Within one subscriber, events
//! arrive in publish order; a subscriber that attaches after a publish misses
//! that event.
//!
//! Each subscriber has its own queue, capped at [`DEFAULT_QUEUE_CAP`]. When a
//! slow subscriber falls behind, the oldest queued `Log` event is dropped to
//! make room; lifecycle events are never dropped.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::events::{self, WireEvent};
use crate::types::{Step, StepResult};

/// Maximum queued events per subscriber before old `Log` events are dropped.
pub const DEFAULT_QUEUE_CAP: usize = 1024;

/// Delay before a subscriber retries a failed connection.
const RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Where the bus lives on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusAddress {
    #[cfg(unix)]
    Unix(PathBuf),
    Tcp(std::net::SocketAddr),
}

impl BusAddress {
    /// Address derived from the configured socket path. On POSIX this is a
    /// UNIX domain socket; elsewhere a fixed localhost TCP port stands in.
    pub fn from_socket_path(path: impl Into<PathBuf>) -> Self {
        #[cfg(unix)]
        {
            Self::Unix(path.into())
        }
        #[cfg(not(unix))]
        {
            let _: PathBuf = path.into();
            Self::Tcp(std::net::SocketAddr::from(([127, 0, 0, 1], 7117)))
        }
    }
}

impl std::fmt::Display for BusAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(unix)]
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

/// Per-subscriber event queue with the drop-oldest-log overflow policy.
#[derive(Debug)]
struct SubscriberQueue {
    /// `None` is the terminator sentinel pushed at shutdown.
    events: Mutex<VecDeque<Option<WireEvent>>>,
    notify: Notify,
    cap: usize,
}

impl SubscriberQueue {
    fn new(cap: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            cap,
        }
    }

    fn push(&self, event: Option<WireEvent>) {
        let mut events = self.events.lock();
        if event.is_some() && events.len() >= self.cap {
            if let Some(idx) = events
                .iter()
                .position(|e| e.as_ref().is_some_and(WireEvent::is_log))
            {
                events.remove(idx);
                debug!("subscriber queue full, dropped oldest log event");
            }
        }
        events.push_back(event);
        drop(events);
        self.notify.notify_one();
    }

    /// Next queued item; `None` means the terminator was reached.
    async fn next(&self) -> Option<WireEvent> {
        loop {
            if let Some(item) = self.events.lock().pop_front() {
                return item;
            }
            self.notify.notified().await;
        }
    }
}

#[derive(Debug)]
struct BusInner {
    subscribers: Mutex<Vec<Arc<SubscriberQueue>>>,
    queue_cap: usize,
}

impl BusInner {
    fn register(&self) -> Arc<SubscriberQueue> {
        let queue = Arc::new(SubscriberQueue::new(self.queue_cap));
        self.subscribers.lock().push(Arc::clone(&queue));
        queue
    }

    fn unregister(&self, queue: &Arc<SubscriberQueue>) {
        self.subscribers
            .lock()
            .retain(|q| !Arc::ptr_eq(q, queue));
    }

    fn broadcast(&self, event: &WireEvent) {
        let subscribers = self.subscribers.lock().clone();
        for queue in subscribers {
            queue.push(Some(event.clone()));
        }
    }

    fn terminate_all(&self) {
        let subscribers = std::mem::take(&mut *self.subscribers.lock());
        for queue in subscribers {
            queue.push(None);
        }
    }
}

/// Publishing handle, cheap to clone and safe to call from sync code.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    inner: Arc<BusInner>,
}

impl EventPublisher {
    pub fn step_started(&self, step: &Step) {
        self.inner.broadcast(&WireEvent::StepStarted {
            step: events::step_to_wire(step),
        });
    }

    pub fn step_ended(&self, result: &StepResult) {
        self.inner.broadcast(&WireEvent::StepEnded {
            result: events::step_result_to_wire(result),
        });
    }

    pub fn log(&self, message: &str, level: &str) {
        self.inner.broadcast(&WireEvent::Log {
            message: message.to_string(),
            level: level.to_string(),
        });
    }
}

/// The single per-process event server.
///
/// Owned by the outermost component of the producer process; there is no
/// hidden global instance.
#[derive(Debug)]
pub struct EventBus {
    inner: Arc<BusInner>,
    address: BusAddress,
    cancel: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
}

impl EventBus {
    /// Bind the socket and start accepting subscribers.
    ///
    /// A stale socket file left by a dead producer is removed before binding.
    pub async fn bind(address: BusAddress) -> Result<Self> {
        Self::bind_with_cap(address, DEFAULT_QUEUE_CAP).await
    }

    pub async fn bind_with_cap(address: BusAddress, queue_cap: usize) -> Result<Self> {
        let inner = Arc::new(BusInner {
            subscribers: Mutex::new(Vec::new()),
            queue_cap,
        });
        let cancel = CancellationToken::new();

        let accept_task = match &address {
            #[cfg(unix)]
            BusAddress::Unix(path) => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                let listener = UnixListener::bind(path)?;
                tokio::spawn(accept_loop(listener, Arc::clone(&inner), cancel.clone()))
            }
            BusAddress::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await?;
                tokio::spawn(accept_loop(listener, Arc::clone(&inner), cancel.clone()))
            }
        };

        Ok(Self {
            inner,
            address,
            cancel,
            accept_task: Some(accept_task),
        })
    }

    pub fn address(&self) -> &BusAddress {
        &self.address
    }

    pub fn publisher(&self) -> EventPublisher {
        EventPublisher {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Stop accepting, terminate every subscriber stream, and remove the
    /// socket file.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        self.inner.terminate_all();
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
        self.remove_socket_file();
    }

    fn remove_socket_file(&self) {
        #[cfg(unix)]
        if let BusAddress::Unix(path) = &self.address {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.inner.terminate_all();
        self.remove_socket_file();
    }
}

/// Accept connections until cancelled; each subscriber gets a queue and a
/// writer task.
trait Accept {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;
    async fn accept_stream(&self) -> std::io::Result<Self::Stream>;
}

#[cfg(unix)]
impl Accept for UnixListener {
    type Stream = UnixStream;
    async fn accept_stream(&self) -> std::io::Result<Self::Stream> {
        self.accept().await.map(|(stream, _)| stream)
    }
}

impl Accept for TcpListener {
    type Stream = TcpStream;
    async fn accept_stream(&self) -> std::io::Result<Self::Stream> {
        self.accept().await.map(|(stream, _)| stream)
    }
}

async fn accept_loop<L: Accept>(listener: L, inner: Arc<BusInner>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept_stream() => match accepted {
                Ok(stream) => {
                    let queue = inner.register();
                    tokio::spawn(serve_subscriber(stream, queue, Arc::clone(&inner)));
                }
                Err(e) => {
                    warn!(error = %e, "event bus accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

/// Drain one subscriber's queue onto its stream until the terminator or a
/// write failure.
async fn serve_subscriber<S>(stream: S, queue: Arc<SubscriberQueue>, inner: Arc<BusInner>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    // Zero-length greeting: the subscriber is registered once this arrives,
    // so wait_until_ready on the other side implies no missed events.
    if framed.send(Bytes::new()).await.is_err() {
        inner.unregister(&queue);
        return;
    }

    while let Some(event) = queue.next().await {
        match serde_json::to_vec(&event) {
            Ok(bytes) => {
                if framed.send(Bytes::from(bytes)).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "failed to encode event frame"),
        }
    }
    inner.unregister(&queue);
}

/// Callbacks a subscriber dispatches to, one per event kind.
///
/// Callbacks run on the subscriber's consumer task and must not block; UI
/// consumers re-dispatch onto their own loop.
pub trait EventHandler: Send {
    fn on_step_started(&mut self, step: Step);
    fn on_step_ended(&mut self, result: StepResult);
    fn on_log(&mut self, message: String, level: String);
}

/// A consumer of the bus stream, possibly in a different process than the
/// producer.
#[derive(Debug)]
pub struct EventSubscriber {
    stop: CancellationToken,
    ready_rx: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl EventSubscriber {
    /// Connect to `address` in the background and dispatch events to
    /// `handler`. Connection failures are retried until [`stop`] is called;
    /// a cleanly closed stream ends the subscription.
    ///
    /// [`stop`]: EventSubscriber::stop
    pub fn start<H: EventHandler + 'static>(address: BusAddress, handler: H) -> Self {
        let stop = CancellationToken::new();
        let (ready_tx, ready_rx) = watch::channel(false);
        let task = tokio::spawn(consume(address, handler, stop.clone(), ready_tx));
        Self {
            stop,
            ready_rx,
            task,
        }
    }

    /// Wait until the subscription is acknowledged by the server, so that a
    /// producer can publish without racing the attach.
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.ready_rx.clone();
        let result = tokio::time::timeout(timeout, rx.wait_for(|ready| *ready)).await;
        matches!(result, Ok(Ok(_)))
    }

    /// Signal stop and wait for the consumer task to finish.
    pub async fn stop(self) {
        self.stop.cancel();
        let _ = self.task.await;
    }
}

async fn consume<H: EventHandler>(
    address: BusAddress,
    mut handler: H,
    stop: CancellationToken,
    ready_tx: watch::Sender<bool>,
) {
    loop {
        if stop.is_cancelled() {
            break;
        }
        match connect_and_read(&address, &mut handler, &stop, &ready_tx).await {
            // Clean end of stream: the server shut down.
            Ok(()) => break,
            Err(e) => {
                if stop.is_cancelled() {
                    break;
                }
                debug!(error = %e, "event subscription retry after error");
                tokio::select! {
                    () = stop.cancelled() => break,
                    () = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        }
    }
}

async fn connect_and_read<H: EventHandler>(
    address: &BusAddress,
    handler: &mut H,
    stop: &CancellationToken,
    ready_tx: &watch::Sender<bool>,
) -> Result<()> {
    match address {
        #[cfg(unix)]
        BusAddress::Unix(path) => {
            let stream = UnixStream::connect(path).await?;
            read_stream(stream, handler, stop, ready_tx).await
        }
        BusAddress::Tcp(addr) => {
            let stream = TcpStream::connect(addr).await?;
            read_stream(stream, handler, stop, ready_tx).await
        }
    }
}

async fn read_stream<S, H>(
    stream: S,
    handler: &mut H,
    stop: &CancellationToken,
    ready_tx: &watch::Sender<bool>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: EventHandler,
{
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
    loop {
        tokio::select! {
            () = stop.cancelled() => return Ok(()),
            frame = framed.next() => match frame {
                None => return Ok(()),
                Some(Err(e)) => return Err(BusError::Io(e)),
                Some(Ok(bytes)) if bytes.is_empty() => {
                    let _ = ready_tx.send(true);
                }
                Some(Ok(bytes)) => match serde_json::from_slice::<WireEvent>(&bytes) {
                    Ok(event) => dispatch(event, handler),
                    Err(e) => warn!(error = %e, "dropping undecodable event frame"),
                },
            }
        }
    }
}

fn dispatch<H: EventHandler>(event: WireEvent, handler: &mut H) {
    match event {
        WireEvent::StepStarted { step } => handler.on_step_started(events::step_from_wire(&step)),
        WireEvent::StepEnded { result } => match events::step_result_from_wire(&result) {
            Ok(result) => handler.on_step_ended(result),
            Err(e) => warn!(error = %e, "dropping malformed step result"),
        },
        WireEvent::Log { message, level } => handler.on_log(message, level),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_cap_drops_oldest_log_first() {
        let queue = SubscriberQueue::new(3);
        queue.push(Some(WireEvent::Log {
            message: "first".to_string(),
            level: "INFO".to_string(),
        }));
        queue.push(Some(WireEvent::StepStarted {
            step: events::step_to_wire(&Step::new(1, "Step 1", Vec::new())),
        }));
        queue.push(Some(WireEvent::Log {
            message: "second".to_string(),
            level: "INFO".to_string(),
        }));
        queue.push(Some(WireEvent::Log {
            message: "third".to_string(),
            level: "INFO".to_string(),
        }));

        let events = queue.events.lock();
        assert_eq!(events.len(), 3);
        // "first" was sacrificed; the lifecycle event survived.
        assert!(matches!(
            events[0],
            Some(WireEvent::StepStarted { .. })
        ));
        assert!(matches!(
            &events[1],
            Some(WireEvent::Log { message, .. }) if message == "second"
        ));
    }

    #[test]
    fn queue_cap_never_drops_lifecycle_events() {
        let queue = SubscriberQueue::new(2);
        for id in 0..4 {
            queue.push(Some(WireEvent::StepStarted {
                step: events::step_to_wire(&Step::new(id, format!("Step {id}"), Vec::new())),
            }));
        }
        assert_eq!(queue.events.lock().len(), 4);
    }

    #[tokio::test]
    async fn queue_next_returns_sentinel() {
        let queue = SubscriberQueue::new(8);
        queue.push(Some(WireEvent::Log {
            message: "m".to_string(),
            level: "INFO".to_string(),
        }));
        queue.push(None);
        assert!(queue.next().await.is_some());
        assert!(queue.next().await.is_none());
    }

    #[test]
    fn broadcast_reaches_every_registered_queue() {
        let inner = BusInner {
            subscribers: Mutex::new(Vec::new()),
            queue_cap: 8,
        };
        let first = inner.register();
        let second = inner.register();
        inner.broadcast(&WireEvent::Log {
            message: "hello".to_string(),
            level: "INFO".to_string(),
        });
        assert_eq!(first.events.lock().len(), 1);
        assert_eq!(second.events.lock().len(), 1);

        inner.unregister(&first);
        inner.broadcast(&WireEvent::Log {
            message: "again".to_string(),
            level: "INFO".to_string(),
        });
        assert_eq!(first.events.lock().len(), 1);
        assert_eq!(second.events.lock().len(), 2);
    }

    #[test]
    fn terminate_pushes_sentinel_and_clears_registry() {
        let inner = BusInner {
            subscribers: Mutex::new(Vec::new()),
            queue_cap: 8,
        };
        let queue = inner.register();
        inner.terminate_all();
        assert!(inner.subscribers.lock().is_empty());
        assert_eq!(queue.events.lock().back(), Some(&None));
    }
}
