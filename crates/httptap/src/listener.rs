use std::time::{Duration, Instant};

use tcpsession::{TcpMessage, parse_record};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::capture;
use crate::error::Result;
use crate::reassembler::Reassembler;

/// Capture backend to read segments from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// Raw IP socket bound to the capture address (needs CAP_NET_RAW)
    RawSocket,
    /// libpcap handles, one per matching interface
    Pcap,
}

/// Listener construction parameters.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// IP to capture on; empty means every interface
    pub addr: String,
    /// Port whose traffic is tapped. Zero is test mode: no capture
    /// worker, segments enter through [`Listener::submit`] only.
    pub port: u16,
    /// Capture backend
    pub engine: Engine,
    /// Also capture and pair the server's responses
    pub track_response: bool,
    /// Idle time before a partial message is evicted; zero selects the
    /// 2 s default
    pub expire: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            port: 0,
            engine: Engine::RawSocket,
            track_response: false,
            expire: DEFAULT_EXPIRE,
        }
    }
}

/// Depth of the inbound record queue and the outbound message queue.
const QUEUE_DEPTH: usize = 10_000;

/// Eviction timeout used when the config leaves it zero.
const DEFAULT_EXPIRE: Duration = Duration::from_millis(2000);

/// How long [`Listener::ready`] waits for capture to come up.
const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Facade over capture and reassembly.
///
/// Owns the reassembly worker and the capture threads. Capture pushes raw
/// `[16 B src IP][TCP segment]` records onto a bounded queue; the worker
/// turns them into [`TcpMessage`] values read back with
/// [`recv`](Self::recv). Overload drops records silently — loss is a
/// property of passive capture, there is no backpressure to the kernel.
///
/// ```no_run
/// use httptap::{Engine, Listener, ListenerConfig};
///
/// # async fn run() -> httptap::Result<()> {
/// let mut listener = Listener::new(ListenerConfig {
///     port: 80,
///     engine: Engine::Pcap,
///     track_response: true,
///     ..Default::default()
/// })?;
/// listener.ready().await;
/// while let Some(message) = listener.recv().await {
///     println!("{} bytes {}", message.bytes().len(), message.id());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Listener {
    record_tx: mpsc::Sender<Vec<u8>>,
    messages: Option<mpsc::Receiver<TcpMessage>>,
    shutdown: watch::Sender<bool>,
    ready: watch::Sender<bool>,
}

impl Listener {
    /// Start the reassembly worker and, unless `config.port` is zero, the
    /// configured capture backend. Must be called within a tokio runtime.
    ///
    /// Capture setup errors (bad address, no matching device, socket
    /// permissions) are fatal here; read errors after startup are not.
    pub fn new(config: ListenerConfig) -> Result<Self> {
        let expire = if config.expire.is_zero() {
            DEFAULT_EXPIRE
        } else {
            config.expire
        };

        let (record_tx, record_rx) = mpsc::channel(QUEUE_DEPTH);
        let (message_tx, message_rx) = mpsc::channel(QUEUE_DEPTH);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (ready, _) = watch::channel(false);

        spawn_reassembler(
            config.port,
            config.track_response,
            expire,
            record_rx,
            message_tx,
            shutdown_rx.clone(),
        );

        if config.port != 0 {
            match config.engine {
                Engine::RawSocket => {
                    capture::raw_socket::start(&config, expire, record_tx.clone(), shutdown_rx)?;
                }
                Engine::Pcap => {
                    capture::pcap::start(&config, expire, record_tx.clone(), shutdown_rx)?;
                }
            }
            info!(port = config.port, engine = ?config.engine, "capture started");
        }
        ready.send_replace(true);

        Ok(Self {
            record_tx,
            messages: Some(message_rx),
            shutdown,
            ready,
        })
    }

    /// Enqueue one capture record without blocking. Dropped if the
    /// inbound queue is full.
    pub fn submit(&self, record: Vec<u8>) {
        if self.record_tx.try_send(record).is_err() {
            debug!("inbound queue full; dropping capture record");
        }
    }

    /// Wait until capture is live, up to five seconds.
    pub async fn ready(&self) -> bool {
        let mut rx = self.ready.subscribe();
        tokio::time::timeout(READY_TIMEOUT, rx.wait_for(|live| *live))
            .await
            .map(|woken| woken.is_ok())
            .unwrap_or(false)
    }

    /// Receive the next completed message. Returns `None` after
    /// [`close`](Self::close), or if the receiver was taken with
    /// [`receiver`](Self::receiver).
    pub async fn recv(&mut self) -> Option<TcpMessage> {
        match self.messages.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Take the outbound channel for external consumption. Subsequent
    /// calls (and [`recv`](Self::recv)) yield nothing.
    pub fn receiver(&mut self) -> Option<mpsc::Receiver<TcpMessage>> {
        self.messages.take()
    }

    /// Stop capture and reassembly. Capture threads observe the signal at
    /// their next read timeout; pending outbound messages may be lost.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.close();
    }
}

/// The single worker that owns all reassembly state, multiplexing
/// inbound records, the eviction tick and shutdown.
fn spawn_reassembler(
    port: u16,
    track_response: bool,
    expire: Duration,
    mut records: mpsc::Receiver<Vec<u8>>,
    messages: mpsc::Sender<TcpMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut reassembler = Reassembler::new(port, track_response, expire);
        let mut gc = tokio::time::interval(expire / 2);
        gc.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => continue,
                record = records.recv() => {
                    let Some(record) = record else { break };
                    match parse_record(&record, Instant::now()) {
                        Ok(packet) => emit(&messages, reassembler.process(packet)).await,
                        // Truncated records are routine on a tap; drop and move on.
                        Err(e) => debug!(error = %e, "dropping undecodable capture record"),
                    }
                }
                _ = gc.tick() => {
                    emit(&messages, reassembler.sweep(Instant::now())).await;
                }
            }
        }
        debug!("reassembly worker stopped");
    });
}

async fn emit(messages: &mpsc::Sender<TcpMessage>, batch: Vec<TcpMessage>) {
    for message in batch {
        if messages.send(message).await.is_err() {
            // Consumer went away; remaining output is lost, as on close.
            return;
        }
    }
}
