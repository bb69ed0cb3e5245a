//! Configuration types for the mock device.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Static device configuration (set at construction time).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address both the command interface and data handles bind to.
    pub bind_address: IpAddr,
    /// Port of the command interface, 0 for an ephemeral one.
    pub http_port: u16,
    /// Polling granularity of the server loops.
    pub poll_interval: Duration,
    /// Samples per scan until a `samples_per_scan` parameter is set.
    pub samples_per_scan: u32,
    /// Scan frequency in Hz until a `scan_frequency` parameter is set.
    pub scan_frequency: u32,
    /// Largest number of samples put in one packet.
    pub max_points_per_packet: usize,
}

impl ServerConfig {
    /// Create a configuration bound to `127.0.0.1` on ephemeral ports.
    pub fn new() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            http_port: 0,
            poll_interval: Duration::from_millis(20),
            samples_per_scan: 720,
            scan_frequency: 35,
            max_points_per_packet: 300,
        }
    }

    /// Set the bind address.
    pub fn with_bind_address(mut self, addr: IpAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Serve the command interface on a fixed port.
    pub fn with_http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_samples_per_scan(mut self, samples: u32) -> Self {
        self.samples_per_scan = samples;
        self
    }

    pub fn with_scan_frequency(mut self, hz: u32) -> Self {
        self.scan_frequency = hz;
        self
    }

    pub fn with_max_points_per_packet(mut self, points: usize) -> Self {
        self.max_points_per_packet = points.max(1);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
