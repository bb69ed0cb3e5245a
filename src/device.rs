//! Device handle and in-flight request gate.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default port of the HTTP command interface.
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// A scanner reachable at an IPv4 address.
///
/// Cheap to clone. Clones share the request gate, so at most one request is
/// in flight per device no matter which clone submitted it.
#[derive(Clone)]
pub struct Device {
    name: Arc<str>,
    address: Ipv4Addr,
    http_port: u16,
    busy: Arc<AtomicBool>,
}

impl Device {
    pub fn new(name: impl Into<String>, address: Ipv4Addr) -> Self {
        Self {
            name: Arc::from(name.into()),
            address,
            http_port: DEFAULT_HTTP_PORT,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use a non-standard port for the command interface.
    pub fn with_http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Address of the HTTP command interface.
    pub fn command_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.address, self.http_port))
    }

    /// Address of a scan data port handed out by the device.
    pub fn data_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.address, port))
    }

    /// Returns true while a request is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claim the request gate.
    ///
    /// Returns `None` if another request is already in flight. The gate is
    /// released when the returned guard is dropped.
    pub(crate) fn try_begin_request(&self) -> Option<RequestGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RequestGuard {
                busy: Arc::clone(&self.busy),
            })
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("http_port", &self.http_port)
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// Holds a device's request gate until dropped.
pub(crate) struct RequestGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_is_exclusive() {
        let device = Device::new("R2000", Ipv4Addr::LOCALHOST);
        let guard = device.try_begin_request().expect("gate is free");
        assert!(device.is_busy());
        assert!(device.try_begin_request().is_none());

        drop(guard);
        assert!(!device.is_busy());
        assert!(device.try_begin_request().is_some());
    }

    #[test]
    fn test_clones_share_the_gate() {
        let device = Device::new("R2000", Ipv4Addr::new(10, 0, 10, 9));
        let clone = device.clone();
        let _guard = device.try_begin_request().unwrap();
        assert!(clone.is_busy());
        assert!(clone.try_begin_request().is_none());
    }

    #[test]
    fn test_addresses() {
        let device = Device::new("R2000", Ipv4Addr::new(10, 0, 10, 9)).with_http_port(8080);
        assert_eq!(device.command_addr().to_string(), "10.0.10.9:8080");
        assert_eq!(device.data_addr(41000).to_string(), "10.0.10.9:41000");
        assert_eq!(device.to_string(), "R2000 (10.0.10.9)");
    }
}
