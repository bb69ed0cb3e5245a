//! Live scan data sessions.
//!
//! A [`SessionBuilder`] asks the device for a TCP scan data handle, connects
//! to it and starts scan output. The resulting [`Session`] owns a delivery
//! thread that decodes packets, assembles complete scans and publishes each
//! one into the session's [`ScanMailbox`]. Watchdog feeding runs on a
//! thread of its own, so a slow command interface never stalls delivery.
//!
//! Connection loss is reported by message: every receiver returned by
//! [`Session::on_connection_lost`] gets exactly one [`ConnectionLost`].

use std::fmt;
use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::mailbox::ScanMailbox;
use crate::parameters::{ParameterBatch, TcpHandle};
use crate::protocol::{CommandClient, HandleInfo, PacketFramer, ScanAssembler};
use crate::request::PendingRequest;

/// How long a socket read may block before the delivery thread checks its
/// stop flag and timers.
const READ_POLL: Duration = Duration::from_millis(100);

/// How often the watchdog thread checks whether the session stopped.
const STOP_POLL: Duration = Duration::from_millis(50);

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Requested kernel receive buffer for the data socket.
const SOCKET_RECV_BUFFER: usize = 1024 * 1024;

/// Garbage tolerated between two good packets before the stream is
/// considered lost.
const MAX_DESYNC_BYTES: usize = 256 * 1024;

// =============================================================================
// Connection loss
// =============================================================================

/// Why a session's data channel became unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LossReason {
    /// The device closed the connection.
    EndOfStream,
    /// Reading from the socket failed.
    Io(String),
    /// Too much undecodable data in a row.
    Desync { discarded: usize },
    /// No data for longer than the allowed silence.
    Silence(Duration),
}

impl fmt::Display for LossReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LossReason::EndOfStream => write!(f, "connection closed by device"),
            LossReason::Io(msg) => write!(f, "socket error: {}", msg),
            LossReason::Desync { discarded } => {
                write!(f, "lost packet sync ({} bytes discarded)", discarded)
            }
            LossReason::Silence(limit) => write!(f, "no data for {:?}", limit),
        }
    }
}

/// Message sent once to each subscriber when the data channel is lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionLost {
    pub reason: LossReason,
}

#[derive(Default)]
struct LossState {
    lost: Option<ConnectionLost>,
    subscribers: Vec<Sender<ConnectionLost>>,
}

/// State shared between a session and its delivery thread.
#[derive(Default)]
struct Shared {
    stop: AtomicBool,
    loss: Mutex<LossState>,
    packets: AtomicU64,
    scans: AtomicU64,
}

impl Shared {
    fn subscribe(&self) -> Receiver<ConnectionLost> {
        let (tx, rx) = mpsc::channel();
        let mut state = self.loss.lock().unwrap_or_else(PoisonError::into_inner);
        match &state.lost {
            Some(lost) => {
                let _ = tx.send(lost.clone());
            }
            None => state.subscribers.push(tx),
        }
        rx
    }

    /// Record the loss and notify every subscriber. Only the first call has
    /// an effect.
    fn declare_lost(&self, reason: LossReason) {
        let mut state = self.loss.lock().unwrap_or_else(PoisonError::into_inner);
        if state.lost.is_some() {
            return;
        }
        let message = ConnectionLost { reason };
        for subscriber in state.subscribers.drain(..) {
            let _ = subscriber.send(message.clone());
        }
        state.lost = Some(message);
    }

    fn loss(&self) -> Option<ConnectionLost> {
        self.loss
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lost
            .clone()
    }
}

// =============================================================================
// Session establishment
// =============================================================================

/// Establishes scan data sessions.
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    handle: TcpHandle,
    silence_timeout: Option<Duration>,
}

impl SessionBuilder {
    pub fn new(handle: TcpHandle) -> Self {
        Self {
            handle,
            silence_timeout: None,
        }
    }

    /// Declare the connection lost after this long without data.
    ///
    /// Defaults to the watchdog timeout when the watchdog is enabled; with
    /// the watchdog disabled there is no limit unless one is set here.
    pub fn with_silence_timeout(mut self, timeout: Duration) -> Self {
        self.silence_timeout = Some(timeout);
        self
    }

    fn effective_silence_timeout(&self) -> Option<Duration> {
        self.silence_timeout.or_else(|| {
            self.handle
                .watchdog_timeout_ms()
                .map(|ms| Duration::from_millis(ms as u64))
        })
    }

    /// Start establishing a session with `device`.
    ///
    /// Returns `None` if the device already has a request in flight. The
    /// whole sequence (handle request, data connection, start of scan
    /// output) is bounded by `timeout`.
    pub fn build(&self, device: &Device, timeout: Duration) -> Option<PendingRequest<Session>> {
        let guard = device.try_begin_request()?;

        if let Err(err) = self.handle.validate() {
            log::warn!("{}: session refused: {}", device, err);
            return Some(PendingRequest::failed("request_handle_tcp", err));
        }

        log::info!(
            "{}: requesting TCP handle ({}, timeout {:?})",
            device,
            self.handle.packet_type().as_param(),
            timeout
        );
        let builder = self.clone();
        let device = device.clone();
        Some(PendingRequest::spawn(
            guard,
            "request_handle_tcp",
            timeout,
            move || builder.establish(&device, timeout),
        ))
    }

    fn establish(&self, device: &Device, timeout: Duration) -> Result<Session> {
        let deadline = Instant::now() + timeout;

        let client = CommandClient::new(device, time_left(deadline)?)?;
        let handle = client.request_handle_tcp(&self.handle.parameters())?;
        log::debug!("{}: granted handle {} on port {}", device, handle.handle, handle.port);

        let started = connect_data(device.data_addr(handle.port), time_left(deadline)?)
            .and_then(|stream| {
                CommandClient::new(device, time_left(deadline)?)?
                    .start_scanoutput(&handle.handle)?;
                Ok(stream)
            })
            .and_then(|stream| Session::start(device.clone(), handle.clone(), stream, self, timeout));

        started.map_err(|err| {
            release_best_effort(device, timeout, &handle, false);
            err
        })
    }
}

fn time_left(deadline: Instant) -> Result<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|d| !d.is_zero())
        .ok_or_else(|| Error::timeout("session establishment"))
}

/// Open the scan data connection.
fn connect_data(addr: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    let context = format!("connecting to scan data port {}", addr);
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| Error::connection(context.clone(), e))?;

    if let Err(e) = socket.set_recv_buffer_size(SOCKET_RECV_BUFFER) {
        log::debug!("could not enlarge receive buffer: {}", e);
    }
    if let Err(e) = socket.set_keepalive(true) {
        log::debug!("could not enable keepalive: {}", e);
    }
    socket
        .set_nodelay(true)
        .map_err(|e| Error::connection(context.clone(), e))?;
    socket
        .connect_timeout(&SockAddr::from(addr), timeout)
        .map_err(|e| Error::connection(context.clone(), e))?;

    let stream: TcpStream = socket.into();
    stream
        .set_read_timeout(Some(READ_POLL))
        .map_err(|e| Error::connection(context, e))?;
    Ok(stream)
}

/// Stop scan output and release the handle, logging failures.
fn release_best_effort(device: &Device, timeout: Duration, handle: &HandleInfo, stop_output: bool) {
    let client = match CommandClient::new(device, timeout) {
        Ok(client) => client,
        Err(e) => {
            log::warn!("cannot release handle {}: {}", handle.handle, e);
            return;
        }
    };
    if stop_output {
        if let Err(e) = client.stop_scanoutput(&handle.handle) {
            log::warn!("stop_scanoutput {} failed: {}", handle.handle, e);
        }
    }
    match client.release_handle(&handle.handle) {
        Ok(()) => log::debug!("released handle {}", handle.handle),
        Err(e) => log::warn!("release_handle {} failed: {}", handle.handle, e),
    }
}

// =============================================================================
// Session
// =============================================================================

/// A live scan data channel.
///
/// Dropping the session stops the delivery and watchdog threads, then stops
/// scan output and releases the handle on the device (best effort).
pub struct Session {
    device: Device,
    handle: HandleInfo,
    request_timeout: Duration,
    mailbox: Arc<ScanMailbox>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
}

impl Session {
    fn start(
        device: Device,
        handle: HandleInfo,
        stream: TcpStream,
        builder: &SessionBuilder,
        request_timeout: Duration,
    ) -> Result<Self> {
        let mailbox = Arc::new(ScanMailbox::new());
        let shared = Arc::new(Shared::default());

        let delivery = Delivery {
            stream,
            mailbox: Arc::clone(&mailbox),
            shared: Arc::clone(&shared),
            silence_timeout: builder.effective_silence_timeout(),
        };
        let worker = thread::Builder::new()
            .name("r2000-delivery".to_string())
            .spawn(move || delivery.run())
            .map_err(|e| Error::connection("spawning delivery thread", e))?;

        // From here on, dropping the session stops and joins the worker.
        let mut session = Self {
            device,
            handle,
            request_timeout,
            mailbox,
            shared,
            worker: Some(worker),
            watchdog: None,
        };

        if let Some(timeout_ms) = builder.handle.watchdog_timeout_ms() {
            let feeder = WatchdogFeeder {
                device: session.device.clone(),
                handle: session.handle.handle.clone(),
                period: Duration::from_millis(timeout_ms as u64) / 2,
                request_timeout,
                shared: Arc::clone(&session.shared),
            };
            let watchdog = thread::Builder::new()
                .name("r2000-watchdog".to_string())
                .spawn(move || feeder.run())
                .map_err(|e| Error::connection("spawning watchdog thread", e))?;
            session.watchdog = Some(watchdog);
        }

        log::info!(
            "{}: session {} streaming from port {}",
            session.device,
            session.handle.handle,
            session.handle.port
        );
        Ok(session)
    }

    /// Subscribe to connection loss.
    ///
    /// The receiver gets exactly one message. Subscribing after the loss
    /// delivers it immediately.
    pub fn on_connection_lost(&self) -> Receiver<ConnectionLost> {
        self.shared.subscribe()
    }

    /// Mailbox holding the most recent complete scan.
    pub fn scan_mailbox(&self) -> Arc<ScanMailbox> {
        Arc::clone(&self.mailbox)
    }

    pub fn handle(&self) -> &HandleInfo {
        &self.handle
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Returns false once the connection has been lost.
    pub fn is_connected(&self) -> bool {
        self.shared.loss().is_none()
    }

    /// The loss notification, if the connection has been lost.
    pub fn connection_lost(&self) -> Option<ConnectionLost> {
        self.shared.loss()
    }

    /// Number of packets decoded so far.
    pub fn packets_received(&self) -> u64 {
        self.shared.packets.load(Ordering::Relaxed)
    }

    /// Number of complete scans published so far.
    pub fn scans_published(&self) -> u64 {
        self.shared.scans.load(Ordering::Relaxed)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("delivery thread panicked");
            }
        }
        if let Some(watchdog) = self.watchdog.take() {
            if watchdog.join().is_err() {
                log::warn!("watchdog thread panicked");
            }
        }
        release_best_effort(&self.device, self.request_timeout, &self.handle, true);
        log::info!("{}: session {} closed", self.device, self.handle.handle);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.device)
            .field("handle", &self.handle)
            .field("connected", &self.is_connected())
            .field("scans_published", &self.scans_published())
            .finish()
    }
}

// =============================================================================
// Delivery and watchdog threads
// =============================================================================

/// Feeds the device watchdog every half timeout until the session stops or
/// the channel is lost.
struct WatchdogFeeder {
    device: Device,
    handle: String,
    period: Duration,
    request_timeout: Duration,
    shared: Arc<Shared>,
}

impl WatchdogFeeder {
    fn run(self) {
        let client = match CommandClient::new(&self.device, self.request_timeout.min(self.period)) {
            Ok(client) => client,
            Err(e) => {
                log::warn!("watchdog of {} will not be fed: {}", self.handle, e);
                return;
            }
        };

        let mut last_feed = Instant::now();
        while !self.shared.stop.load(Ordering::Acquire) && self.shared.loss().is_none() {
            if last_feed.elapsed() >= self.period {
                if let Err(e) = client.feed_watchdog(&self.handle) {
                    log::warn!("feed_watchdog {} failed: {}", self.handle, e);
                }
                last_feed = Instant::now();
            }
            thread::sleep(STOP_POLL.min(self.period));
        }
        log::debug!("watchdog thread of {} stopped", self.handle);
    }
}

struct Delivery {
    stream: TcpStream,
    mailbox: Arc<ScanMailbox>,
    shared: Arc<Shared>,
    silence_timeout: Option<Duration>,
}

impl Delivery {
    fn run(mut self) {
        let mut framer = PacketFramer::new();
        let mut assembler = ScanAssembler::new();
        let result = self.receive(&mut framer, &mut assembler);
        log::debug!(
            "delivery: {} scans assembled, {} dropped, {} bytes discarded, {} bytes unframed",
            assembler.completed(),
            assembler.dropped(),
            framer.discarded_total(),
            framer.buffered()
        );

        match result {
            Ok(()) => log::debug!("delivery thread stopped"),
            Err(reason) => {
                log::warn!("scan data connection lost: {}", reason);
                self.shared.declare_lost(reason);
            }
        }
    }

    /// Receive until stopped (`Ok`) or the connection is lost (`Err`).
    fn receive(
        &mut self,
        framer: &mut PacketFramer,
        assembler: &mut ScanAssembler,
    ) -> std::result::Result<(), LossReason> {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut last_data = Instant::now();

        loop {
            if self.shared.stop.load(Ordering::Acquire) {
                return Ok(());
            }

            match self.stream.read(&mut buf) {
                Ok(0) => return Err(LossReason::EndOfStream),
                Ok(n) => {
                    last_data = Instant::now();
                    framer.extend(&buf[..n]);
                    while let Some(packet) = framer.next_packet() {
                        self.shared.packets.fetch_add(1, Ordering::Relaxed);
                        if let Some(scan) = assembler.push(packet) {
                            log::trace!(
                                "scan {} complete ({} samples)",
                                scan.scan_number,
                                scan.len()
                            );
                            self.mailbox.publish(scan);
                            self.shared.scans.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    let discarded = framer.discarded_since_last_packet();
                    if discarded > MAX_DESYNC_BYTES {
                        return Err(LossReason::Desync { discarded });
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(LossReason::Io(e.to_string())),
            }

            if let Some(limit) = self.silence_timeout {
                if last_data.elapsed() >= limit {
                    return Err(LossReason::Silence(limit));
                }
            }
        }
    }
}
