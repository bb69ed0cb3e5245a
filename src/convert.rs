//! Scan to point cloud conversion.

use std::f64::consts::TAU;

use crate::types::Scan;

/// A point in the scanner's frame, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Points ready to be displayed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointCloud {
    pub points: Vec<Point3>,
}

impl PointCloud {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Projects scan samples onto the scan plane (`z = 0`).
///
/// Sample `i` lies at `start_angle + i * 2π / samples_per_scan`. Samples
/// without a valid distance are skipped, as are samples past
/// `samples_per_scan`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanToPointCloud {
    samples_per_scan: usize,
    start_angle: f64,
    step: f64,
}

impl ScanToPointCloud {
    /// `start_angle` is in radians.
    pub fn new(samples_per_scan: u32, start_angle: f64) -> Self {
        let samples_per_scan = samples_per_scan.max(1) as usize;
        Self {
            samples_per_scan,
            start_angle,
            step: TAU / samples_per_scan as f64,
        }
    }

    pub fn samples_per_scan(&self) -> usize {
        self.samples_per_scan
    }

    pub fn convert(&self, scan: &Scan) -> PointCloud {
        if scan.len() != self.samples_per_scan {
            log::debug!(
                "scan {} has {} samples, expected {}",
                scan.scan_number,
                scan.len(),
                self.samples_per_scan
            );
        }

        let points = scan
            .points
            .iter()
            .take(self.samples_per_scan)
            .enumerate()
            .filter_map(|(i, point)| {
                let distance = point.distance_mm? as f64;
                let angle = self.start_angle + i as f64 * self.step;
                Some(Point3::new(
                    (distance * angle.cos()) as f32,
                    (distance * angle.sin()) as f32,
                    0.0,
                ))
            })
            .collect();
        PointCloud { points }
    }
}
