//! Continuous TCP scan acquisition from Pepperl+Fuchs R2000 laser scanners.
//!
//! The crate covers the whole path from device configuration to display:
//!
//! 1. [`SetParameters`] applies parameter batches through the device's HTTP
//!    command interface.
//! 2. [`SessionBuilder`] requests a TCP scan data handle and starts scan
//!    output, yielding a [`Session`].
//! 3. The session's delivery thread assembles complete scans and publishes
//!    each one into a lock-free, single-slot [`ScanMailbox`].
//! 4. [`AcquisitionLoop`] polls the mailbox, converts new scans to point
//!    clouds and pushes them to a [`RenderSink`].
//!
//! # Requests
//!
//! Configuration and session establishment are asynchronous and bounded by a
//! caller-supplied timeout. Only one request may be in flight per device:
//! submitting while another is pending returns `None` instead of queuing.
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//! use std::time::Duration;
//! use r2000_scan::{
//!     AcquisitionLoop, CancellationFlag, Device, LogSink, Measure, RenderSink,
//!     ScanToPointCloud, SessionBuilder, SetParameters, SurfaceConfig, TcpHandle,
//! };
//!
//! let device = Device::new("R2000", Ipv4Addr::new(10, 0, 10, 9));
//! let timeout = Duration::from_secs(1);
//!
//! let measure = Measure::default().with_scan_frequency(35).with_samples_per_scan(7200);
//! let (outcome, _) = SetParameters::new(&device)
//!     .submit(timeout, &[&measure])
//!     .expect("device idle")
//!     .wait();
//! assert!(outcome.is_success());
//!
//! let handle = TcpHandle::default().with_watchdog().with_watchdog_timeout(5000);
//! let (_, session) = SessionBuilder::new(handle)
//!     .build(&device, timeout)
//!     .expect("device idle")
//!     .wait();
//! let session = session.expect("session established");
//!
//! let mut sink = LogSink::new();
//! sink.initialize(&SurfaceConfig::default()).unwrap();
//! let converter = ScanToPointCloud::new(7200, -std::f64::consts::PI);
//! let report = AcquisitionLoop::new(sink, &session, converter, CancellationFlag::new()).run();
//! println!("stopped: {}", report.stop_reason);
//! ```

pub mod acquisition;
pub mod cancel;
pub mod convert;
pub mod device;
mod error;
pub mod mailbox;
pub mod parameters;
pub mod protocol;
pub mod render;
pub mod request;
pub mod session;
pub mod types;

// Crate-level error types
pub use error::{Error, Result};

// Core types
pub use types::{FailureReason, RequestOutcome, Scan, ScanPoint, ScanTimestamp};

// Device and requests
pub use device::Device;
pub use parameters::{HmiDisplay, Measure, ParameterBatch, TcpHandle};
pub use request::{PendingRequest, SetParameters};

// Sessions
pub use mailbox::{Mailbox, ScanMailbox};
pub use session::{ConnectionLost, LossReason, Session, SessionBuilder};

// Consumer side
pub use acquisition::{AcquisitionConfig, AcquisitionLoop, AcquisitionReport, LoopState, StopReason};
pub use cancel::CancellationFlag;
pub use convert::{Point3, PointCloud, ScanToPointCloud};
pub use render::{CloudStyle, LogSink, RenderSink, Rgb, SurfaceConfig};
