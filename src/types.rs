//! Device-agnostic types shared across the crate.
//!
//! Provides the scan snapshot delivered by a live session, the enumerations
//! used by parameter batches, and the outcome of asynchronous requests.

use std::f64::consts::PI;
use std::fmt;

use crate::error::Error;

// =============================================================================
// Scans
// =============================================================================

/// Raw device timestamp of a scan.
///
/// Taken from the first packet of the scan. Two scans with the same
/// timestamp are the same scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ScanTimestamp(pub u64);

impl ScanTimestamp {
    /// Returns the raw device value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScanTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single measurement of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanPoint {
    /// Distance in millimetres, `None` when the device reported no echo.
    pub distance_mm: Option<u32>,
    /// Echo amplitude (packet types B and C only).
    pub amplitude: Option<u16>,
}

impl ScanPoint {
    /// Creates a point with a valid distance.
    pub fn new(distance_mm: u32) -> Self {
        Self {
            distance_mm: Some(distance_mm),
            amplitude: None,
        }
    }

    /// Creates a point for which the device reported no echo.
    pub fn invalid() -> Self {
        Self::default()
    }

    /// Attach an amplitude to this point.
    pub fn with_amplitude(mut self, amplitude: u16) -> Self {
        self.amplitude = Some(amplitude);
        self
    }
}

/// One complete, immutable revolution of the scanner head.
///
/// Built by the session's delivery thread once every packet of the scan has
/// arrived. It is shared behind an `Arc` and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Scan {
    /// Scan counter as reported by the device (wraps at `u16::MAX`).
    pub scan_number: u16,
    /// Device timestamp of the first packet.
    pub timestamp: ScanTimestamp,
    /// Scan frequency in mHz.
    pub scan_frequency_mhz: u32,
    /// Angle of the first sample, in 1/10000 degree.
    pub first_angle: i32,
    /// Angle between two samples, in 1/10000 degree (negative for CW).
    pub angular_increment: i32,
    /// The samples, in device order.
    pub points: Vec<ScanPoint>,
}

impl Scan {
    /// Number of samples in the scan.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if the scan holds no samples.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of samples carrying a valid distance.
    pub fn valid_count(&self) -> usize {
        self.points
            .iter()
            .filter(|p| p.distance_mm.is_some())
            .count()
    }

    /// Angle of sample `index` in radians, derived from the scan header.
    pub fn angle_of(&self, index: usize) -> f64 {
        let ticks = self.first_angle as f64 + self.angular_increment as f64 * index as f64;
        ticks / 10_000.0 * PI / 180.0
    }
}

// =============================================================================
// Parameter enumerations
// =============================================================================

/// Scan data packet layout requested for a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PacketType {
    /// Distance only (4 bytes per sample).
    #[default]
    A,
    /// Distance and amplitude (6 bytes per sample).
    B,
    /// Compact distance and amplitude (4 bytes per sample).
    C,
}

impl PacketType {
    /// Value of the `packet_type` field in the packet header.
    pub fn wire_id(&self) -> u16 {
        match self {
            PacketType::A => 0x0041,
            PacketType::B => 0x0042,
            PacketType::C => 0x0043,
        }
    }

    /// Parse the `packet_type` header field.
    pub fn from_wire_id(id: u16) -> Option<Self> {
        match id {
            0x0041 => Some(PacketType::A),
            0x0042 => Some(PacketType::B),
            0x0043 => Some(PacketType::C),
            _ => None,
        }
    }

    /// Size of one sample in bytes.
    pub fn sample_size(&self) -> usize {
        match self {
            PacketType::A | PacketType::C => 4,
            PacketType::B => 6,
        }
    }

    /// Value used in command queries.
    pub fn as_param(&self) -> &'static str {
        match self {
            PacketType::A => "A",
            PacketType::B => "B",
            PacketType::C => "C",
        }
    }
}

/// Rotation direction of the scanner head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanDirection {
    Cw,
    Ccw,
}

impl ScanDirection {
    pub fn as_param(&self) -> &'static str {
        match self {
            ScanDirection::Cw => "cw",
            ScanDirection::Ccw => "ccw",
        }
    }
}

/// Operating mode of the measuring core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatingMode {
    Measure,
    EmitterOff,
}

impl OperatingMode {
    pub fn as_param(&self) -> &'static str {
        match self {
            OperatingMode::Measure => "measure",
            OperatingMode::EmitterOff => "emitter_off",
        }
    }
}

/// Language of the device display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    English,
    German,
}

impl Language {
    pub fn as_param(&self) -> &'static str {
        match self {
            Language::English => "english",
            Language::German => "german",
        }
    }
}

/// What the device display shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HmiDisplayMode {
    Off,
    StaticLogo,
    StaticText,
    BargraphDistance,
    BargraphEcho,
    BargraphReflector,
    ApplicationBitmap,
    ApplicationText,
}

impl HmiDisplayMode {
    pub fn as_param(&self) -> &'static str {
        match self {
            HmiDisplayMode::Off => "off",
            HmiDisplayMode::StaticLogo => "static_logo",
            HmiDisplayMode::StaticText => "static_text",
            HmiDisplayMode::BargraphDistance => "bargraph_distance",
            HmiDisplayMode::BargraphEcho => "bargraph_echo",
            HmiDisplayMode::BargraphReflector => "bargraph_reflector",
            HmiDisplayMode::ApplicationBitmap => "application_bitmap",
            HmiDisplayMode::ApplicationText => "application_text",
        }
    }
}

// =============================================================================
// Request outcomes
// =============================================================================

/// Why a request did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// No acknowledgement before the deadline.
    Timeout,
    /// The device answered with a non-zero `error_code`.
    Device { code: i32, text: String },
    /// The device could not be reached or the connection broke.
    Connection(String),
    /// The device reply could not be understood.
    Protocol(String),
    /// The request was refused before being sent.
    InvalidParameters(String),
}

impl FailureReason {
    /// Short, stable code used in diagnostics.
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::Timeout => "timeout",
            FailureReason::Device { .. } => "device-error",
            FailureReason::Connection(_) => "connection",
            FailureReason::Protocol(_) => "protocol",
            FailureReason::InvalidParameters(_) => "invalid-parameters",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Device { code, text } => {
                write!(f, "device-error {}: {}", code, text)
            }
            FailureReason::Connection(msg) => write!(f, "connection: {}", msg),
            FailureReason::Protocol(msg) => write!(f, "protocol: {}", msg),
            FailureReason::InvalidParameters(msg) => write!(f, "invalid-parameters: {}", msg),
        }
    }
}

impl From<Error> for FailureReason {
    fn from(err: Error) -> Self {
        match err {
            Error::Timeout(_) => FailureReason::Timeout,
            Error::Device { code, text } => FailureReason::Device { code, text },
            Error::Protocol(msg) => FailureReason::Protocol(msg),
            Error::InvalidParameters(msg) => FailureReason::InvalidParameters(msg),
            other @ (Error::Connection { .. } | Error::Http { .. } | Error::Context { .. }) => {
                FailureReason::Connection(other.to_string())
            }
        }
    }
}

/// Result of an accepted request. Produced exactly once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    Failure(FailureReason),
}

impl RequestOutcome {
    /// Returns true on success.
    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Success)
    }

    /// Returns the failure reason, if any.
    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            RequestOutcome::Success => None,
            RequestOutcome::Failure(reason) => Some(reason),
        }
    }
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestOutcome::Success => write!(f, "success"),
            RequestOutcome::Failure(reason) => write!(f, "{}", reason),
        }
    }
}
