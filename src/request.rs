//! Asynchronous, timeout-bounded device requests.
//!
//! A request is accepted only if the device has no other request in flight;
//! otherwise submission returns `None` straight away. Accepted requests run
//! on a worker thread and are resolved exactly once through
//! [`PendingRequest::wait`], which never blocks past the request's deadline.
//!
//! # Example
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//! use std::time::Duration;
//! use r2000_scan::{Device, Measure, SetParameters};
//! use r2000_scan::types::ScanDirection;
//!
//! let device = Device::new("R2000", Ipv4Addr::new(10, 0, 10, 9));
//! let measure = Measure::default()
//!     .with_scan_frequency(35)
//!     .with_scan_direction(ScanDirection::Ccw);
//!
//! match SetParameters::new(&device).submit(Duration::from_secs(1), &[&measure]) {
//!     Some(request) => println!("set_parameter: {}", request.wait().0),
//!     None => println!("device busy"),
//! }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::device::{Device, RequestGuard};
use crate::error::{Error, Result};
use crate::parameters::ParameterBatch;
use crate::protocol::CommandClient;
use crate::types::{FailureReason, RequestOutcome};

// =============================================================================
// Pending request
// =============================================================================

/// An accepted request whose outcome is not known yet.
///
/// Consumed by [`wait`](Self::wait), so an outcome is observed exactly once.
/// Dropping it without waiting abandons the result; a value produced later
/// by the worker (such as a session) is dropped and cleaned up there.
#[must_use = "a pending request does nothing unless waited on"]
pub struct PendingRequest<T> {
    rx: Receiver<Result<T>>,
    deadline: Instant,
    name: &'static str,
}

impl<T: Send + 'static> PendingRequest<T> {
    /// Run `work` on a worker thread holding the device's request gate.
    pub(crate) fn spawn<F>(
        guard: RequestGuard,
        name: &'static str,
        timeout: Duration,
        work: F,
    ) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let deadline = Instant::now() + timeout;
        let (tx, rx) = mpsc::sync_channel(1);

        let spawned = thread::Builder::new()
            .name(format!("r2000-{}", name))
            .spawn(move || {
                let result = work();
                // Free the gate before the waiter can observe the outcome.
                drop(guard);
                if let Err(mpsc::SendError(Ok(_))) = tx.send(result) {
                    log::debug!("{}: result arrived after the waiter gave up", name);
                }
            });

        match spawned {
            Ok(_) => Self { rx, deadline, name },
            Err(e) => Self::failed(name, Error::connection("spawning request worker", e)),
        }
    }
}

impl<T> PendingRequest<T> {
    /// A request that resolved before anything was sent.
    pub(crate) fn failed(name: &'static str, err: Error) -> Self {
        let (tx, rx) = mpsc::sync_channel(1);
        let _ = tx.send(Err(err));
        Self {
            rx,
            deadline: Instant::now(),
            name,
        }
    }

    /// Time left before the request times out.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Block until the request resolves or its deadline passes.
    ///
    /// Returns the outcome and, on success, the produced value.
    pub fn wait(self) -> (RequestOutcome, Option<T>) {
        let result = match self.rx.recv_timeout(self.remaining()) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(Error::timeout(self.name)),
            Err(RecvTimeoutError::Disconnected) => Err(Error::protocol(format!(
                "{}: worker exited without a result",
                self.name
            ))),
        };

        match result {
            Ok(value) => {
                log::debug!("{}: success", self.name);
                (RequestOutcome::Success, Some(value))
            }
            Err(err) => {
                log::debug!("{}: {}", self.name, err);
                (RequestOutcome::Failure(FailureReason::from(err)), None)
            }
        }
    }
}

impl<T> fmt::Debug for PendingRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("name", &self.name)
            .field("remaining", &self.remaining())
            .finish()
    }
}

// =============================================================================
// set_parameter
// =============================================================================

/// Applies parameter batches to a device.
#[derive(Debug, Clone)]
pub struct SetParameters {
    device: Device,
}

impl SetParameters {
    pub fn new(device: &Device) -> Self {
        Self {
            device: device.clone(),
        }
    }

    /// Submit `batches` as one `set_parameter` transaction.
    ///
    /// Returns `None` if the device already has a request in flight. Batches
    /// that fail validation (or an empty batch list) resolve to
    /// `Failure(InvalidParameters)` without contacting the device.
    pub fn submit(
        &self,
        timeout: Duration,
        batches: &[&dyn ParameterBatch],
    ) -> Option<PendingRequest<()>> {
        let guard = self.device.try_begin_request()?;

        let params = match merge_batches(batches) {
            Ok(params) => params,
            Err(err) => {
                log::warn!("{}: set_parameter refused: {}", self.device, err);
                return Some(PendingRequest::failed("set_parameter", err));
            }
        };

        let names: Vec<&str> = batches.iter().map(|b| b.name()).collect();
        log::info!(
            "{}: set_parameter [{}] ({} values, timeout {:?})",
            self.device,
            names.join(", "),
            params.len(),
            timeout
        );

        let device = self.device.clone();
        Some(PendingRequest::spawn(
            guard,
            "set_parameter",
            timeout,
            move || CommandClient::new(&device, timeout)?.set_parameter(&params),
        ))
    }
}

/// Validate and merge batches into a single parameter list.
fn merge_batches(batches: &[&dyn ParameterBatch]) -> Result<Vec<(&'static str, String)>> {
    if batches.is_empty() {
        return Err(Error::invalid_parameters("no parameter batch given"));
    }

    let mut seen = HashSet::new();
    let mut params = Vec::new();
    for batch in batches {
        batch.validate()?;
        for (name, value) in batch.parameters() {
            if !seen.insert(name) {
                return Err(Error::invalid_parameters(format!(
                    "{} is set by more than one batch",
                    name
                )));
            }
            params.push((name, value));
        }
    }

    if params.is_empty() {
        return Err(Error::invalid_parameters("batches set no parameter"));
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::{HmiDisplay, Measure};
    use crate::types::{Language, ScanDirection};
    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, TcpListener};

    /// Accepts one connection and answers it with `reply` after `delay`.
    fn fake_device(reply: &'static str, delay: Duration) -> (Device, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 2048];
            let n = stream.read(&mut buf).unwrap();
            thread::sleep(delay);
            let _ = stream.write_all(reply.as_bytes());
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });
        (
            Device::new("R2000", Ipv4Addr::LOCALHOST).with_http_port(port),
            handle,
        )
    }

    const OK: &str = "HTTP/1.0 200 OK\r\n\r\n{\"error_code\":0,\"error_text\":\"success\"}";

    fn measure() -> Measure {
        Measure::default()
            .with_scan_frequency(35)
            .with_samples_per_scan(7200)
            .with_scan_direction(ScanDirection::Ccw)
    }

    #[test]
    fn test_submit_success_merges_batches() {
        let (device, server) = fake_device(OK, Duration::ZERO);
        let hmi = HmiDisplay::default().with_hmi_language(Language::English);
        let measure = measure();

        let request = SetParameters::new(&device)
            .submit(Duration::from_secs(1), &[&hmi, &measure])
            .expect("device is idle");
        let (outcome, value) = request.wait();
        assert_eq!(outcome, RequestOutcome::Success);
        assert_eq!(value, Some(()));

        let raw = server.join().unwrap();
        assert!(raw.contains("hmi_language=english"));
        assert!(raw.contains("scan_frequency=35"));
        assert!(raw.contains("samples_per_scan=7200"));
        assert!(raw.contains("scan_direction=ccw"));
        assert!(!device.is_busy());
    }

    #[test]
    fn test_submit_device_error() {
        let (device, server) = fake_device(
            "HTTP/1.0 200 OK\r\n\r\n{\"error_code\":110,\"error_text\":\"invalid parameter value\"}",
            Duration::ZERO,
        );
        let (outcome, _) = SetParameters::new(&device)
            .submit(Duration::from_secs(1), &[&measure()])
            .unwrap()
            .wait();
        assert_eq!(
            outcome,
            RequestOutcome::Failure(FailureReason::Device {
                code: 110,
                text: "invalid parameter value".to_string()
            })
        );
        server.join().unwrap();
    }

    #[test]
    fn test_silent_device_times_out_within_bound() {
        let (device, server) = fake_device(OK, Duration::from_millis(600));
        let timeout = Duration::from_millis(200);
        let start = Instant::now();
        let (outcome, _) = SetParameters::new(&device)
            .submit(timeout, &[&measure()])
            .unwrap()
            .wait();

        assert_eq!(outcome, RequestOutcome::Failure(FailureReason::Timeout));
        assert!(start.elapsed() < timeout + Duration::from_millis(150));
        server.join().unwrap();
    }

    #[test]
    fn test_busy_device_rejects_second_request() {
        let (device, server) = fake_device(OK, Duration::from_millis(200));
        let first = SetParameters::new(&device)
            .submit(Duration::from_secs(1), &[&measure()])
            .unwrap();

        assert!(SetParameters::new(&device)
            .submit(Duration::from_secs(1), &[&measure()])
            .is_none());

        assert!(first.wait().0.is_success());
        server.join().unwrap();
    }

    #[test]
    fn test_invalid_batches_fail_without_traffic() {
        // Nothing listens on this device; any traffic would be a connection error.
        let device = Device::new("R2000", Ipv4Addr::LOCALHOST).with_http_port(1);
        let request = SetParameters::new(&device);

        let (outcome, _) = request.submit(Duration::from_secs(1), &[]).unwrap().wait();
        assert_eq!(outcome.failure().unwrap().code(), "invalid-parameters");

        let bad = Measure::default().with_scan_frequency(99);
        let (outcome, _) = request
            .submit(Duration::from_secs(1), &[&bad])
            .unwrap()
            .wait();
        assert_eq!(outcome.failure().unwrap().code(), "invalid-parameters");
        assert!(!device.is_busy());
    }

    #[test]
    fn test_duplicate_parameters_are_rejected() {
        let a = Measure::default().with_scan_frequency(35);
        let b = Measure::default().with_scan_frequency(50);
        let err = merge_batches(&[&a, &b]).unwrap_err();
        assert!(err.to_string().contains("scan_frequency"));
    }
}
