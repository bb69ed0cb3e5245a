//! Immutable parameter batches submitted to the device.
//!
//! Batches are plain values built through consuming `with_*` transformations.
//! Only the settings that were explicitly chosen are sent; everything else
//! keeps its current value on the device.
//!
//! # Example
//!
//! ```
//! use r2000_scan::parameters::{Measure, ParameterBatch};
//! use r2000_scan::types::{OperatingMode, ScanDirection};
//!
//! let measure = Measure::default()
//!     .with_operating_mode(OperatingMode::Measure)
//!     .with_scan_frequency(35)
//!     .with_samples_per_scan(7200)
//!     .with_scan_direction(ScanDirection::Ccw);
//!
//! assert!(measure.validate().is_ok());
//! assert_eq!(measure.parameters().len(), 4);
//! ```

use crate::error::{Error, Result};
use crate::types::{HmiDisplayMode, Language, OperatingMode, PacketType, ScanDirection};

/// Sample counts per revolution the measuring core supports.
pub const SUPPORTED_SAMPLES_PER_SCAN: &[u32] = &[
    72, 90, 120, 144, 180, 240, 360, 400, 480, 600, 720, 800, 900, 1200, 1440, 1680, 1800, 2100,
    2400, 2520, 2800, 3600, 4200, 5040, 5600, 6300, 7200, 8400, 10080, 12600, 16800, 25200,
];

/// Scan frequency range in Hz.
pub const SCAN_FREQUENCY_RANGE: std::ops::RangeInclusive<u32> = 10..=50;

/// Longest text a display line accepts.
pub const MAX_HMI_TEXT_LEN: usize = 30;

/// Start angle range in 1/10000 degree.
pub const START_ANGLE_RANGE: std::ops::RangeInclusive<i32> = -1_800_000..=1_800_000;

/// A named group of device settings.
///
/// Batches submitted together are merged into a single request, so the
/// device applies them together or not at all.
pub trait ParameterBatch: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    /// The `(name, value)` pairs this batch sets.
    fn parameters(&self) -> Vec<(&'static str, String)>;

    /// Check the batch before it is sent.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

fn on_off(value: bool) -> String {
    if value { "on" } else { "off" }.to_string()
}

// =============================================================================
// HMI display
// =============================================================================

/// Settings of the device's front display and buttons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HmiDisplay {
    button_lock: Option<bool>,
    parameter_lock: Option<bool>,
    language: Option<Language>,
    display_mode: Option<HmiDisplayMode>,
    application_text_1: Option<String>,
    application_text_2: Option<String>,
}

impl HmiDisplay {
    pub fn lock_hmi_button(mut self) -> Self {
        self.button_lock = Some(true);
        self
    }

    pub fn unlock_hmi_button(mut self) -> Self {
        self.button_lock = Some(false);
        self
    }

    pub fn lock_hmi_parameters(mut self) -> Self {
        self.parameter_lock = Some(true);
        self
    }

    pub fn unlock_hmi_parameters(mut self) -> Self {
        self.parameter_lock = Some(false);
        self
    }

    pub fn with_hmi_language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    pub fn with_hmi_display_mode(mut self, mode: HmiDisplayMode) -> Self {
        self.display_mode = Some(mode);
        self
    }

    /// First line shown in [`HmiDisplayMode::ApplicationText`] mode.
    pub fn with_hmi_application_text_1(mut self, text: impl Into<String>) -> Self {
        self.application_text_1 = Some(text.into());
        self
    }

    /// Second line shown in [`HmiDisplayMode::ApplicationText`] mode.
    pub fn with_hmi_application_text_2(mut self, text: impl Into<String>) -> Self {
        self.application_text_2 = Some(text.into());
        self
    }
}

impl ParameterBatch for HmiDisplay {
    fn name(&self) -> &'static str {
        "hmi"
    }

    fn parameters(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(lock) = self.button_lock {
            params.push(("hmi_button_lock", on_off(lock)));
        }
        if let Some(lock) = self.parameter_lock {
            params.push(("hmi_parameter_lock", on_off(lock)));
        }
        if let Some(language) = self.language {
            params.push(("hmi_language", language.as_param().to_string()));
        }
        if let Some(mode) = self.display_mode {
            params.push(("hmi_display_mode", mode.as_param().to_string()));
        }
        if let Some(text) = &self.application_text_1 {
            params.push(("hmi_application_text_1", text.clone()));
        }
        if let Some(text) = &self.application_text_2 {
            params.push(("hmi_application_text_2", text.clone()));
        }
        params
    }

    fn validate(&self) -> Result<()> {
        for (line, text) in [
            (1, &self.application_text_1),
            (2, &self.application_text_2),
        ] {
            if let Some(text) = text {
                if text.chars().count() > MAX_HMI_TEXT_LEN {
                    return Err(Error::invalid_parameters(format!(
                        "hmi_application_text_{} is longer than {} characters",
                        line, MAX_HMI_TEXT_LEN
                    )));
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Measure
// =============================================================================

/// Settings of the measuring core.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Measure {
    operating_mode: Option<OperatingMode>,
    scan_frequency: Option<u32>,
    samples_per_scan: Option<u32>,
    scan_direction: Option<ScanDirection>,
}

impl Measure {
    pub fn with_operating_mode(mut self, mode: OperatingMode) -> Self {
        self.operating_mode = Some(mode);
        self
    }

    /// Head rotation frequency in Hz.
    pub fn with_scan_frequency(mut self, hz: u32) -> Self {
        self.scan_frequency = Some(hz);
        self
    }

    pub fn with_samples_per_scan(mut self, samples: u32) -> Self {
        self.samples_per_scan = Some(samples);
        self
    }

    pub fn with_scan_direction(mut self, direction: ScanDirection) -> Self {
        self.scan_direction = Some(direction);
        self
    }

    pub fn scan_frequency(&self) -> Option<u32> {
        self.scan_frequency
    }

    pub fn samples_per_scan(&self) -> Option<u32> {
        self.samples_per_scan
    }
}

impl ParameterBatch for Measure {
    fn name(&self) -> &'static str {
        "measure"
    }

    fn parameters(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(mode) = self.operating_mode {
            params.push(("operating_mode", mode.as_param().to_string()));
        }
        if let Some(hz) = self.scan_frequency {
            params.push(("scan_frequency", hz.to_string()));
        }
        if let Some(samples) = self.samples_per_scan {
            params.push(("samples_per_scan", samples.to_string()));
        }
        if let Some(direction) = self.scan_direction {
            params.push(("scan_direction", direction.as_param().to_string()));
        }
        params
    }

    fn validate(&self) -> Result<()> {
        if let Some(hz) = self.scan_frequency {
            if !SCAN_FREQUENCY_RANGE.contains(&hz) {
                return Err(Error::invalid_parameters(format!(
                    "scan_frequency {} Hz is outside [{}, {}]",
                    hz,
                    SCAN_FREQUENCY_RANGE.start(),
                    SCAN_FREQUENCY_RANGE.end()
                )));
            }
        }
        if let Some(samples) = self.samples_per_scan {
            if !SUPPORTED_SAMPLES_PER_SCAN.contains(&samples) {
                return Err(Error::invalid_parameters(format!(
                    "samples_per_scan {} is not supported",
                    samples
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// TCP handle
// =============================================================================

/// Configuration of a TCP scan data handle.
///
/// Not a `set_parameter` batch: it is sent with the handle request when a
/// session is established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHandle {
    packet_type: PacketType,
    start_angle: Option<i32>,
    watchdog: Option<bool>,
    watchdog_timeout_ms: Option<u32>,
    max_num_points_scan: Option<u32>,
    skip_scans: Option<u32>,
}

impl Default for TcpHandle {
    fn default() -> Self {
        Self {
            packet_type: PacketType::A,
            start_angle: None,
            watchdog: None,
            watchdog_timeout_ms: None,
            max_num_points_scan: None,
            skip_scans: None,
        }
    }
}

impl TcpHandle {
    pub fn with_packet_type(mut self, packet_type: PacketType) -> Self {
        self.packet_type = packet_type;
        self
    }

    /// Angle of the first sample, in 1/10000 degree.
    pub fn with_start_angle(mut self, start_angle: i32) -> Self {
        self.start_angle = Some(start_angle);
        self
    }

    pub fn with_watchdog(mut self) -> Self {
        self.watchdog = Some(true);
        self
    }

    pub fn without_watchdog(mut self) -> Self {
        self.watchdog = Some(false);
        self
    }

    pub fn with_watchdog_timeout(mut self, timeout_ms: u32) -> Self {
        self.watchdog_timeout_ms = Some(timeout_ms);
        self
    }

    /// Limit the number of samples sent per scan.
    pub fn with_max_num_points_scan(mut self, points: u32) -> Self {
        self.max_num_points_scan = Some(points);
        self
    }

    /// Only send every `skip + 1`-th scan.
    pub fn with_skip_scans(mut self, skip: u32) -> Self {
        self.skip_scans = Some(skip);
        self
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Returns the watchdog timeout if the watchdog is enabled.
    ///
    /// The device enables the watchdog by default with a 60 s timeout.
    pub fn watchdog_timeout_ms(&self) -> Option<u32> {
        match self.watchdog {
            Some(false) => None,
            _ => Some(self.watchdog_timeout_ms.unwrap_or(60_000)),
        }
    }
}

impl ParameterBatch for TcpHandle {
    fn name(&self) -> &'static str {
        "tcp_handle"
    }

    fn parameters(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("packet_type", self.packet_type.as_param().to_string())];
        if let Some(angle) = self.start_angle {
            params.push(("start_angle", angle.to_string()));
        }
        if let Some(watchdog) = self.watchdog {
            params.push(("watchdog", on_off(watchdog)));
        }
        if let Some(timeout) = self.watchdog_timeout_ms {
            params.push(("watchdogtimeout", timeout.to_string()));
        }
        if let Some(points) = self.max_num_points_scan {
            params.push(("max_num_points_scan", points.to_string()));
        }
        if let Some(skip) = self.skip_scans {
            params.push(("skip_scans", skip.to_string()));
        }
        params
    }

    fn validate(&self) -> Result<()> {
        if let Some(angle) = self.start_angle {
            if !START_ANGLE_RANGE.contains(&angle) {
                return Err(Error::invalid_parameters(format!(
                    "start_angle {} is outside [{}, {}]",
                    angle,
                    START_ANGLE_RANGE.start(),
                    START_ANGLE_RANGE.end()
                )));
            }
        }
        if self.watchdog_timeout_ms == Some(0) {
            return Err(Error::invalid_parameters("watchdogtimeout cannot be 0"));
        }
        Ok(())
    }
}
