//! Render surface abstraction.
//!
//! The acquisition loop talks to its display through [`RenderSink`]. The
//! crate ships [`LogSink`], a headless sink that reports what would be shown
//! through the `log` facade. A windowed viewer implements the same trait.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use crate::convert::PointCloud;
use crate::error::{Error, Result};

/// An 8-bit RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// How a point cloud is drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloudStyle {
    pub color: Rgb,
    pub point_size: f32,
}

impl Default for CloudStyle {
    fn default() -> Self {
        Self {
            color: Rgb::new(0, 240, 0),
            point_size: 2.0,
        }
    }
}

impl CloudStyle {
    pub fn with_color(mut self, color: Rgb) -> Self {
        self.color = color;
        self
    }

    pub fn with_point_size(mut self, point_size: f32) -> Self {
        self.point_size = point_size;
        self
    }
}

/// Window and scene settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Background colour, each channel in `0.0..=1.0`.
    pub background: [f32; 3],
    /// Length of the coordinate axes, `None` to hide them.
    pub axes_scale: Option<f32>,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            title: "Scan viewer".to_string(),
            width: 1280,
            height: 1024,
            background: [0.35, 0.35, 0.35],
            axes_scale: Some(150.0),
        }
    }
}

impl SurfaceConfig {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_background(mut self, background: [f32; 3]) -> Self {
        self.background = background;
        self
    }

    pub fn with_axes(mut self, scale: f32) -> Self {
        self.axes_scale = Some(scale);
        self
    }

    pub fn without_axes(mut self) -> Self {
        self.axes_scale = None;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::invalid_parameters(format!(
                "surface size {}x{} is empty",
                self.width, self.height
            )));
        }
        if self.background.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return Err(Error::invalid_parameters(
                "background channels must be within 0.0..=1.0",
            ));
        }
        Ok(())
    }
}

/// A display that point clouds are pushed to.
pub trait RenderSink {
    /// Prepare the surface. Called once before the first `pump`.
    fn initialize(&mut self, config: &SurfaceConfig) -> Result<()>;

    /// Process display events for up to `budget`.
    ///
    /// This is where the acquisition loop spends its idle time, so
    /// implementations should block for roughly `budget` and never much
    /// longer.
    fn pump(&mut self, budget: Duration);

    /// Returns true once the surface has been closed, by the user or by
    /// [`close`](Self::close).
    fn is_closed(&self) -> bool;

    /// Show `cloud` under `id`, replacing any cloud previously shown there.
    fn show_cloud(&mut self, id: &str, cloud: &PointCloud, style: &CloudStyle) -> Result<()>;

    /// Close the surface. Must be safe to call more than once.
    fn close(&mut self);
}

/// Headless sink reporting displayed clouds through `log`.
#[derive(Debug, Default)]
pub struct LogSink {
    surface: Option<SurfaceConfig>,
    clouds: HashMap<String, usize>,
    updates: u64,
    report_every: u64,
    closed: bool,
}

impl LogSink {
    pub fn new() -> Self {
        Self {
            report_every: 100,
            ..Default::default()
        }
    }

    /// Log at `info` level every `n` updates (others go to `debug`).
    pub fn with_report_every(mut self, n: u64) -> Self {
        self.report_every = n.max(1);
        self
    }

    /// Surface settings passed to `initialize`.
    pub fn surface(&self) -> Option<&SurfaceConfig> {
        self.surface.as_ref()
    }

    /// Number of `show_cloud` calls so far.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Number of points currently shown under `id`.
    pub fn cloud_len(&self, id: &str) -> Option<usize> {
        self.clouds.get(id).copied()
    }
}

impl RenderSink for LogSink {
    fn initialize(&mut self, config: &SurfaceConfig) -> Result<()> {
        config.validate()?;
        log::info!(
            "surface \"{}\" {}x{} (headless)",
            config.title,
            config.width,
            config.height
        );
        self.surface = Some(config.clone());
        Ok(())
    }

    fn pump(&mut self, budget: Duration) {
        thread::sleep(budget);
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn show_cloud(&mut self, id: &str, cloud: &PointCloud, style: &CloudStyle) -> Result<()> {
        if self.closed {
            log::debug!("{}: surface closed, update ignored", id);
            return Ok(());
        }
        self.clouds.insert(id.to_string(), cloud.len());
        self.updates += 1;

        if self.report_every > 0 && self.updates % self.report_every == 0 {
            log::info!("{}: {} points ({} updates)", id, cloud.len(), self.updates);
        } else {
            log::debug!(
                "{}: {} points, color {:?}, size {}",
                id,
                cloud.len(),
                style.color,
                style.point_size
            );
        }
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            log::info!("surface closed after {} updates", self.updates);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::Point3;

    #[test]
    fn test_defaults() {
        let style = CloudStyle::default();
        assert_eq!(style.color, Rgb::new(0, 240, 0));
        assert_eq!(style.point_size, 2.0);

        let surface = SurfaceConfig::default();
        assert_eq!(surface.title, "Scan viewer");
        assert_eq!((surface.width, surface.height), (1280, 1024));
        assert_eq!(surface.axes_scale, Some(150.0));
    }

    #[test]
    fn test_log_sink_replaces_cloud() {
        let mut sink = LogSink::new();
        sink.initialize(&SurfaceConfig::default()).unwrap();

        let cloud = PointCloud {
            points: vec![Point3::new(1.0, 2.0, 0.0); 3],
        };
        sink.show_cloud("scan_cloud", &cloud, &CloudStyle::default())
            .unwrap();
        sink.show_cloud("scan_cloud", &PointCloud::default(), &CloudStyle::default())
            .unwrap();

        assert_eq!(sink.cloud_len("scan_cloud"), Some(0));
        assert_eq!(sink.updates(), 2);
    }

    #[test]
    fn test_log_sink_close() {
        let mut sink = LogSink::new();
        assert!(!sink.is_closed());
        sink.close();
        sink.close();
        assert!(sink.is_closed());
        sink.show_cloud("scan_cloud", &PointCloud::default(), &CloudStyle::default())
            .unwrap();
        assert_eq!(sink.updates(), 0);
    }

    #[test]
    fn test_invalid_surface() {
        let mut sink = LogSink::new();
        assert!(sink
            .initialize(&SurfaceConfig::default().with_size(0, 10))
            .is_err());
        assert!(sink
            .initialize(&SurfaceConfig::default().with_background([2.0, 0.0, 0.0]))
            .is_err());
    }
}
