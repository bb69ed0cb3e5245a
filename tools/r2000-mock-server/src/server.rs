//! Core mock R2000 implementation.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::behavior::DeviceBehavior;
use crate::config::ServerConfig;
use crate::constants::*;
use crate::http::{is_complete, json_response, not_found, parse_request, CommandRequest};
use crate::packet_builder::{build_scan_packets, ScanFrame};

const MAX_REQUEST_LEN: usize = 8 * 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Per-handle state shared with its streaming thread.
struct HandleState {
    name: String,
    packet_type: u16,
    start_angle: i32,
    watchdog: Option<Duration>,
    last_feed: Mutex<Instant>,
    streaming: AtomicBool,
    released: AtomicBool,
}

#[derive(Default)]
struct DeviceState {
    parameters: HashMap<String, String>,
    handles: HashMap<String, Arc<HandleState>>,
    next_handle: u32,
    commands: Vec<CommandRequest>,
}

impl DeviceState {
    fn active_handles(&self) -> usize {
        self.handles
            .values()
            .filter(|h| !h.released.load(Ordering::SeqCst))
            .count()
    }
}

/// A mock R2000 with pluggable behavior.
pub struct MockR2000<B: DeviceBehavior> {
    listener: TcpListener,
    config: ServerConfig,
    behavior: Arc<Mutex<B>>,
    state: Arc<Mutex<DeviceState>>,
    running: Arc<AtomicBool>,
    started: Instant,
}

impl<B: DeviceBehavior> MockR2000<B> {
    /// Create a new mock device with the given configuration and behavior.
    pub fn new(config: ServerConfig, behavior: B) -> io::Result<Self> {
        let listener = TcpListener::bind((config.bind_address, config.http_port))?;
        listener.set_nonblocking(true)?;

        log::info!("Mock R2000 listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            config,
            behavior: Arc::new(Mutex::new(behavior)),
            state: Arc::new(Mutex::new(DeviceState::default())),
            running: Arc::new(AtomicBool::new(true)),
            started: Instant::now(),
        })
    }

    /// Get the address of the command interface.
    pub fn addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Start the device in a background thread and return a handle.
    pub fn spawn(self) -> ServerHandle {
        let addr = self
            .listener
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::from((self.config.bind_address, 0)));
        let running = Arc::clone(&self.running);
        let state = Arc::clone(&self.state);

        let handle = thread::spawn(move || {
            self.run();
        });

        ServerHandle {
            addr,
            running,
            state,
            handle: Some(handle),
        }
    }

    /// Run the command server loop (blocking).
    pub fn run(self) {
        let mut silent = Vec::new();
        let mut streams = Vec::new();

        while self.running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    if let Some(conn) = self.handle_connection(stream, &mut streams) {
                        silent.push(conn);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(self.config.poll_interval);
                }
                Err(e) => {
                    log::error!("Accept error: {}", e);
                    break;
                }
            }
        }

        drop(silent);
        for stream in streams {
            let _ = stream.join();
        }
        log::info!("Mock R2000 stopped");
    }

    /// Serve one command connection. Returns the connection if it must be
    /// held open without a reply.
    fn handle_connection(
        &self,
        mut stream: TcpStream,
        streams: &mut Vec<JoinHandle<()>>,
    ) -> Option<TcpStream> {
        let _ = stream.set_nonblocking(false);
        let _ = stream.set_read_timeout(Some(Duration::from_secs(1)));

        let mut raw = Vec::new();
        let mut buf = [0u8; 1024];
        while !is_complete(&raw) && raw.len() < MAX_REQUEST_LEN {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => return None,
                Ok(n) => raw.extend_from_slice(&buf[..n]),
            }
        }

        let request = match parse_request(&raw) {
            Some(request) => request,
            None => {
                let _ = stream.write_all(&not_found());
                return None;
            }
        };
        log::debug!("Received {} {:?}", request.command, request.params);
        lock(&self.state).commands.push(request.clone());

        let (respond, error_code, latency) = {
            let mut behavior = lock(&self.behavior);
            behavior.on_command(&request.command, &request.params);
            (
                behavior.should_respond(&request.command),
                behavior.error_code(&request.command),
                behavior.simulated_latency(),
            )
        };

        if !respond {
            log::debug!("Ignoring {} (should_respond=false)", request.command);
            return Some(stream);
        }
        if !latency.is_zero() {
            thread::sleep(latency);
        }

        let body = if error_code != ERROR_SUCCESS {
            error(error_code, "error injected by mock")
        } else {
            self.dispatch(&request, streams)
        };
        let _ = stream.write_all(&json_response(&body));
        let _ = stream.shutdown(Shutdown::Write);
        None
    }

    fn dispatch(&self, request: &CommandRequest, streams: &mut Vec<JoinHandle<()>>) -> Value {
        match request.command.as_str() {
            "get_protocol_info" => success(json!({
                "protocol_name": "pfsdp",
                "version_major": 1,
                "version_minor": 3,
                "commands": [
                    "get_protocol_info", "get_parameter", "set_parameter",
                    "request_handle_tcp", "start_scanoutput", "stop_scanoutput",
                    "feed_watchdog", "release_handle"
                ],
            })),
            "get_parameter" => self.get_parameter(request),
            "set_parameter" => self.set_parameter(request),
            "request_handle_tcp" => self.request_handle_tcp(request, streams),
            "start_scanoutput" => self.with_handle(request, |h| {
                h.streaming.store(true, Ordering::SeqCst);
            }),
            "stop_scanoutput" => self.with_handle(request, |h| {
                h.streaming.store(false, Ordering::SeqCst);
            }),
            "feed_watchdog" => self.with_handle(request, |h| {
                *lock(&h.last_feed) = Instant::now();
            }),
            "release_handle" => self.with_handle(request, |h| {
                h.released.store(true, Ordering::SeqCst);
            }),
            _ => error(ERROR_UNKNOWN_ARGUMENT, "unknown command"),
        }
    }

    fn get_parameter(&self, request: &CommandRequest) -> Value {
        let state = lock(&self.state);
        let mut fields = serde_json::Map::new();
        for name in request.param("list").unwrap_or("").split(';') {
            if name.is_empty() {
                continue;
            }
            match state.parameters.get(name) {
                Some(value) => {
                    fields.insert(name.to_string(), Value::String(value.clone()));
                }
                None => return error(ERROR_UNKNOWN_ARGUMENT, "unknown parameter"),
            }
        }
        success(Value::Object(fields))
    }

    fn set_parameter(&self, request: &CommandRequest) -> Value {
        for (name, value) in &request.params {
            let valid = match name.as_str() {
                "scan_frequency" => value.parse::<u32>().is_ok_and(|hz| (10..=50).contains(&hz)),
                "samples_per_scan" => value.parse::<u32>().is_ok_and(|n| n > 0),
                "scan_direction" => matches!(value.as_str(), "cw" | "ccw"),
                "operating_mode" => matches!(value.as_str(), "measure" | "emitter_off"),
                _ => true,
            };
            if !valid {
                return error(ERROR_INVALID_VALUE, "invalid parameter value");
            }
        }

        let mut state = lock(&self.state);
        for (name, value) in &request.params {
            state.parameters.insert(name.clone(), value.clone());
        }
        success(json!({}))
    }

    fn request_handle_tcp(
        &self,
        request: &CommandRequest,
        streams: &mut Vec<JoinHandle<()>>,
    ) -> Value {
        let packet_type = match request.param("packet_type").unwrap_or("A") {
            "A" => PACKET_TYPE_A,
            "B" => PACKET_TYPE_B,
            "C" => PACKET_TYPE_C,
            _ => return error(ERROR_INVALID_VALUE, "invalid packet_type"),
        };
        let watchdog_on = request.param("watchdog").unwrap_or("on") != "off";
        let timeout_ms = match request.param("watchdogtimeout").unwrap_or("60000").parse::<u64>() {
            Ok(ms) if ms > 0 => ms,
            _ => return error(ERROR_INVALID_VALUE, "invalid watchdogtimeout"),
        };
        let start_angle = match request.param("start_angle").unwrap_or("-1800000").parse::<i32>() {
            Ok(angle) => angle,
            Err(_) => return error(ERROR_INVALID_VALUE, "invalid start_angle"),
        };

        let mut state = lock(&self.state);
        if state.active_handles() >= MAX_HANDLES {
            return error(ERROR_HANDLE_LIMIT, "no free handle");
        }

        let listener = match TcpListener::bind((self.config.bind_address, 0)) {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("Failed to bind data port: {}", e);
                return error(ERROR_HANDLE_LIMIT, "no free port");
            }
        };
        let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);

        state.next_handle += 1;
        let handle = Arc::new(HandleState {
            name: format!("s{}", state.next_handle),
            packet_type,
            start_angle,
            watchdog: watchdog_on.then(|| Duration::from_millis(timeout_ms)),
            last_feed: Mutex::new(Instant::now()),
            streaming: AtomicBool::new(false),
            released: AtomicBool::new(false),
        });
        state
            .handles
            .insert(handle.name.clone(), Arc::clone(&handle));
        drop(state);

        log::info!("Granted handle {} on port {}", handle.name, port);
        let streamer = Streamer {
            handle: Arc::clone(&handle),
            listener,
            behavior: Arc::clone(&self.behavior),
            state: Arc::clone(&self.state),
            running: Arc::clone(&self.running),
            config: self.config.clone(),
            started: self.started,
        };
        streams.push(thread::spawn(move || streamer.run()));

        success(json!({ "port": port, "handle": handle.name }))
    }

    fn with_handle<F>(&self, request: &CommandRequest, f: F) -> Value
    where
        F: FnOnce(&HandleState),
    {
        let state = lock(&self.state);
        match request
            .param("handle")
            .and_then(|name| state.handles.get(name))
            .filter(|h| !h.released.load(Ordering::SeqCst))
        {
            Some(handle) => {
                f(handle);
                success(json!({}))
            }
            None => error(ERROR_INVALID_HANDLE, "invalid handle"),
        }
    }
}

fn success(mut fields: Value) -> Value {
    if let Value::Object(map) = &mut fields {
        map.insert("error_code".to_string(), json!(ERROR_SUCCESS));
        map.insert("error_text".to_string(), json!("success"));
    }
    fields
}

fn error(code: i32, text: &str) -> Value {
    json!({ "error_code": code, "error_text": text })
}

// =============================================================================
// Scan data streaming
// =============================================================================

struct Streamer<B: DeviceBehavior> {
    handle: Arc<HandleState>,
    listener: TcpListener,
    behavior: Arc<Mutex<B>>,
    state: Arc<Mutex<DeviceState>>,
    running: Arc<AtomicBool>,
    config: ServerConfig,
    started: Instant,
}

impl<B: DeviceBehavior> Streamer<B> {
    fn run(self) {
        if let Err(e) = self.listener.set_nonblocking(true) {
            log::error!("Data listener error: {}", e);
            return;
        }

        let mut conn: Option<TcpStream> = None;
        let mut scan_number: u16 = 0;
        let mut next_scan = Instant::now();

        while self.running.load(Ordering::SeqCst) && !self.handle.released.load(Ordering::SeqCst) {
            if let Some(timeout) = self.handle.watchdog {
                if lock(&self.handle.last_feed).elapsed() > timeout {
                    log::info!("Watchdog expired for handle {}", self.handle.name);
                    self.handle.released.store(true, Ordering::SeqCst);
                    break;
                }
            }

            if conn.is_none() {
                match self.listener.accept() {
                    Ok((stream, addr)) => {
                        log::debug!("Data connection from {} on {}", addr, self.handle.name);
                        let _ = stream.set_nonblocking(false);
                        let _ = stream.set_nodelay(true);
                        conn = Some(stream);
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => {
                        log::error!("Data accept error: {}", e);
                        break;
                    }
                }
            }

            let (drop_conn, stream_data) = {
                let mut behavior = lock(&self.behavior);
                (behavior.should_drop_data_connection(), behavior.should_stream())
            };
            if drop_conn {
                log::info!("Dropping data connection of handle {}", self.handle.name);
                self.handle.released.store(true, Ordering::SeqCst);
                break;
            }

            let now = Instant::now();
            if now >= next_scan {
                let (samples, frequency) = self.scan_settings();
                let sending = self.handle.streaming.load(Ordering::SeqCst) && stream_data;
                if let (Some(stream), true) = (conn.as_mut(), sending) {
                    let frame = self.frame(scan_number, samples, frequency);
                    let sent = build_scan_packets(&frame, self.config.max_points_per_packet)
                        .iter()
                        .try_for_each(|packet| stream.write_all(packet));
                    scan_number = scan_number.wrapping_add(1);
                    if let Err(e) = sent {
                        log::debug!("Data client of {} went away: {}", self.handle.name, e);
                        conn = None;
                    }
                }
                let period = Duration::from_micros(1_000_000 / frequency.max(1) as u64);
                next_scan = (next_scan + period).max(now);
            }

            let idle = next_scan
                .saturating_duration_since(Instant::now())
                .min(self.config.poll_interval);
            thread::sleep(idle.max(Duration::from_millis(1)));
        }

        if let Some(stream) = conn {
            let _ = stream.shutdown(Shutdown::Both);
        }
        log::debug!("Streaming for handle {} ended", self.handle.name);
    }

    /// Samples per scan and scan frequency currently configured.
    fn scan_settings(&self) -> (u32, u32) {
        let state = lock(&self.state);
        let read = |name: &str, default: u32| {
            state
                .parameters
                .get(name)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };
        (
            read("samples_per_scan", self.config.samples_per_scan),
            read("scan_frequency", self.config.scan_frequency),
        )
    }

    fn frame(&self, scan_number: u16, samples: u32, frequency: u32) -> ScanFrame {
        let behavior = lock(&self.behavior);
        let distances = (0..samples as usize)
            .map(|i| behavior.sample_distance(scan_number, i))
            .collect();
        ScanFrame {
            packet_type: self.handle.packet_type,
            scan_number,
            timestamp_raw: self.started.elapsed().as_nanos() as u64,
            scan_frequency: frequency * 1000,
            first_angle: self.handle.start_angle,
            angular_increment: (3_600_000 / samples.max(1)) as i32,
            distances,
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Handle for controlling a spawned mock device.
pub struct ServerHandle {
    /// Address of the command interface.
    pub addr: SocketAddr,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<DeviceState>>,
    handle: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Port of the command interface.
    pub fn http_port(&self) -> u16 {
        self.addr.port()
    }

    /// Value last set for a parameter.
    pub fn parameter(&self, name: &str) -> Option<String> {
        lock(&self.state).parameters.get(name).cloned()
    }

    /// Number of handles not released yet.
    pub fn active_handles(&self) -> usize {
        lock(&self.state).active_handles()
    }

    /// Names of the commands received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.state)
            .commands
            .iter()
            .map(|c| c.command.clone())
            .collect()
    }

    /// Stop the device.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}
