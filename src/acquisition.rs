//! The acquisition loop.
//!
//! Polls a session's scan mailbox on a fixed cadence and pushes each new scan
//! to a [`RenderSink`] as a point cloud.
//!
//! # States
//!
//! - **Running**: each cycle pumps the sink for one poll interval, checks the
//!   stop conditions, then renders the latest scan if it is new.
//! - **Stopping(reason)**: closes the sink once.
//! - **Stopped(reason)**: terminal.
//!
//! Stop conditions, by priority: cancellation ([`StopReason::Interrupted`]),
//! connection loss ([`StopReason::Disconnected`]) and sink closure
//! ([`StopReason::SinkClosed`]). They are checked right after the pump, so a
//! stop is noticed within one poll interval.
//!
//! Scans are deduplicated by device timestamp: a scan is rendered only if its
//! timestamp differs from the last rendered one. Scans published between two
//! polls are skipped; only the latest is shown.

use std::fmt;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancellationFlag;
use crate::convert::ScanToPointCloud;
use crate::mailbox::ScanMailbox;
use crate::render::{CloudStyle, RenderSink};
use crate::session::{ConnectionLost, Session};
use crate::types::ScanTimestamp;

/// Default time between two polls of the mailbox.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Identifier of the displayed scan cloud.
pub const SCAN_CLOUD_ID: &str = "scan_cloud";

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// Cancellation was requested (interrupt signal).
    Interrupted,
    /// The session's data channel was lost.
    Disconnected,
    /// The render surface was closed.
    SinkClosed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Interrupted => write!(f, "interrupted"),
            StopReason::Disconnected => write!(f, "device disconnected"),
            StopReason::SinkClosed => write!(f, "viewer closed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopping(StopReason),
    Stopped(StopReason),
}

impl LoopState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, LoopState::Stopped(_))
    }
}

/// Loop settings.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    pub poll_interval: Duration,
    pub cloud_id: String,
    pub style: CloudStyle,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            cloud_id: SCAN_CLOUD_ID.to_string(),
            style: CloudStyle::default(),
        }
    }
}

impl AcquisitionConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_cloud_id(mut self, id: impl Into<String>) -> Self {
        self.cloud_id = id.into();
        self
    }

    pub fn with_style(mut self, style: CloudStyle) -> Self {
        self.style = style;
        self
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionReport {
    pub stop_reason: StopReason,
    /// Cycles spent in the running state.
    pub cycles: u64,
    /// Scans pushed to the sink.
    pub rendered: u64,
    /// Polls that found the last rendered scan again.
    pub duplicates_skipped: u64,
}

/// Consumer side of a session.
pub struct AcquisitionLoop<S: RenderSink> {
    sink: S,
    mailbox: Arc<ScanMailbox>,
    connection_lost: Receiver<ConnectionLost>,
    cancel: CancellationFlag,
    converter: ScanToPointCloud,
    config: AcquisitionConfig,
    state: LoopState,
    disconnected: bool,
    last_rendered: Option<ScanTimestamp>,
    cycles: u64,
    rendered: u64,
    duplicates_skipped: u64,
}

impl<S: RenderSink> AcquisitionLoop<S> {
    /// Create a loop consuming `session`'s scans.
    pub fn new(
        sink: S,
        session: &Session,
        converter: ScanToPointCloud,
        cancel: CancellationFlag,
    ) -> Self {
        Self::from_parts(
            sink,
            session.scan_mailbox(),
            session.on_connection_lost(),
            converter,
            cancel,
        )
    }

    /// Create a loop from a mailbox and a connection-lost subscription.
    pub fn from_parts(
        sink: S,
        mailbox: Arc<ScanMailbox>,
        connection_lost: Receiver<ConnectionLost>,
        converter: ScanToPointCloud,
        cancel: CancellationFlag,
    ) -> Self {
        Self {
            sink,
            mailbox,
            connection_lost,
            cancel,
            converter,
            config: AcquisitionConfig::default(),
            state: LoopState::Running,
            disconnected: false,
            last_rendered: None,
            cycles: 0,
            rendered: 0,
            duplicates_skipped: 0,
        }
    }

    pub fn with_config(mut self, config: AcquisitionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Run until stopped.
    pub fn run(&mut self) -> AcquisitionReport {
        log::info!(
            "acquisition running (poll interval {:?})",
            self.config.poll_interval
        );
        loop {
            if let LoopState::Stopped(reason) = self.step() {
                let report = self.report(reason);
                log::info!(
                    "acquisition stopped: {} ({} scans rendered, {} cycles)",
                    reason,
                    report.rendered,
                    report.cycles
                );
                return report;
            }
        }
    }

    /// Execute one cycle of the state machine and return the new state.
    pub fn step(&mut self) -> LoopState {
        match self.state {
            LoopState::Running => {
                self.cycles += 1;
                self.sink.pump(self.config.poll_interval);
                if let Some(reason) = self.stop_condition() {
                    log::debug!("stopping: {}", reason);
                    self.state = LoopState::Stopping(reason);
                } else {
                    self.render_latest();
                }
            }
            LoopState::Stopping(reason) => {
                self.sink.close();
                self.state = LoopState::Stopped(reason);
            }
            LoopState::Stopped(_) => {}
        }
        self.state
    }

    fn report(&self, stop_reason: StopReason) -> AcquisitionReport {
        AcquisitionReport {
            stop_reason,
            cycles: self.cycles,
            rendered: self.rendered,
            duplicates_skipped: self.duplicates_skipped,
        }
    }

    fn stop_condition(&mut self) -> Option<StopReason> {
        self.drain_connection_lost();
        if self.cancel.is_cancelled() {
            Some(StopReason::Interrupted)
        } else if self.disconnected {
            Some(StopReason::Disconnected)
        } else if self.sink.is_closed() {
            Some(StopReason::SinkClosed)
        } else {
            None
        }
    }

    fn drain_connection_lost(&mut self) {
        if self.disconnected {
            return;
        }
        match self.connection_lost.try_recv() {
            Ok(lost) => {
                log::warn!("connection lost: {}", lost.reason);
                self.disconnected = true;
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                log::warn!("session went away");
                self.disconnected = true;
            }
        }
    }

    fn render_latest(&mut self) {
        let Some(scan) = self.mailbox.peek() else {
            return;
        };
        if self.last_rendered == Some(scan.timestamp) {
            self.duplicates_skipped += 1;
            return;
        }
        self.last_rendered = Some(scan.timestamp);

        let cloud = self.converter.convert(&scan);
        match self
            .sink
            .show_cloud(&self.config.cloud_id, &cloud, &self.config.style)
        {
            Ok(()) => self.rendered += 1,
            Err(e) => log::warn!("failed to show scan {}: {}", scan.scan_number, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::PointCloud;
    use crate::error::Result;
    use crate::render::SurfaceConfig;
    use crate::session::LossReason;
    use crate::types::{Scan, ScanPoint};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc::{self, Sender};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Instant;

    /// Sink double recording what the loop did to it.
    #[derive(Clone, Default)]
    struct TestSink {
        pumps: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
        shown: Arc<Mutex<Vec<(String, usize)>>>,
        sleep: bool,
    }

    impl RenderSink for TestSink {
        fn initialize(&mut self, _config: &SurfaceConfig) -> Result<()> {
            Ok(())
        }

        fn pump(&mut self, budget: Duration) {
            self.pumps.fetch_add(1, Ordering::SeqCst);
            if self.sleep {
                thread::sleep(budget);
            }
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn show_cloud(&mut self, id: &str, cloud: &PointCloud, _style: &CloudStyle) -> Result<()> {
            self.shown.lock().unwrap().push((id.to_string(), cloud.len()));
            Ok(())
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn scan(timestamp: u64, valid: usize) -> Scan {
        let mut points = vec![ScanPoint::new(1000); valid];
        points.resize(8, ScanPoint::invalid());
        Scan {
            scan_number: timestamp as u16,
            timestamp: ScanTimestamp(timestamp),
            scan_frequency_mhz: 35_000,
            first_angle: -1_800_000,
            angular_increment: 450_000,
            points,
        }
    }

    struct Harness {
        mailbox: Arc<ScanMailbox>,
        lost_tx: Sender<ConnectionLost>,
        cancel: CancellationFlag,
        sink: TestSink,
        acquisition: AcquisitionLoop<TestSink>,
    }

    fn harness() -> Harness {
        let mailbox = Arc::new(ScanMailbox::new());
        let (lost_tx, lost_rx) = mpsc::channel();
        let cancel = CancellationFlag::new();
        let sink = TestSink::default();
        let acquisition = AcquisitionLoop::from_parts(
            sink.clone(),
            Arc::clone(&mailbox),
            lost_rx,
            ScanToPointCloud::new(8, -std::f64::consts::PI),
            cancel.clone(),
        );
        Harness {
            mailbox,
            lost_tx,
            cancel,
            sink,
            acquisition,
        }
    }

    #[test]
    fn test_nothing_rendered_before_first_scan() {
        let mut h = harness();
        assert_eq!(h.acquisition.step(), LoopState::Running);
        assert_eq!(h.acquisition.step(), LoopState::Running);
        assert!(h.sink.shown.lock().unwrap().is_empty());
        assert_eq!(h.sink.pumps.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_same_timestamp_rendered_once() {
        let mut h = harness();
        h.mailbox.publish(scan(1, 5));
        h.acquisition.step();
        h.acquisition.step();
        // Republished with an equal timestamp: still a duplicate.
        h.mailbox.publish(scan(1, 5));
        h.acquisition.step();

        h.mailbox.publish(scan(2, 3));
        h.acquisition.step();

        let shown = h.sink.shown.lock().unwrap().clone();
        assert_eq!(
            shown,
            vec![("scan_cloud".to_string(), 5), ("scan_cloud".to_string(), 3)]
        );
        assert_eq!(h.acquisition.duplicates_skipped, 2);
    }

    #[test]
    fn test_only_latest_scan_is_rendered() {
        let mut h = harness();
        h.mailbox.publish(scan(1, 1));
        h.mailbox.publish(scan(2, 2));
        h.mailbox.publish(scan(3, 3));
        h.acquisition.step();

        let shown = h.sink.shown.lock().unwrap().clone();
        assert_eq!(shown, vec![("scan_cloud".to_string(), 3)]);
    }

    #[test]
    fn test_cancellation_stops_and_closes_once() {
        let mut h = harness();
        h.mailbox.publish(scan(1, 1));
        h.cancel.cancel();

        assert_eq!(
            h.acquisition.step(),
            LoopState::Stopping(StopReason::Interrupted)
        );
        // No render once stopping.
        assert!(h.sink.shown.lock().unwrap().is_empty());
        assert_eq!(
            h.acquisition.step(),
            LoopState::Stopped(StopReason::Interrupted)
        );
        assert_eq!(
            h.acquisition.step(),
            LoopState::Stopped(StopReason::Interrupted)
        );
        assert_eq!(h.sink.closes.load(Ordering::SeqCst), 1);
        assert_eq!(h.sink.pumps.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connection_lost_stops_loop() {
        let mut h = harness();
        h.acquisition.step();
        h.lost_tx
            .send(ConnectionLost {
                reason: LossReason::Silence(Duration::from_millis(5000)),
            })
            .unwrap();

        assert_eq!(
            h.acquisition.step(),
            LoopState::Stopping(StopReason::Disconnected)
        );
    }

    #[test]
    fn test_session_hang_up_counts_as_disconnect() {
        let mut h = harness();
        drop(h.lost_tx);
        assert_eq!(
            h.acquisition.step(),
            LoopState::Stopping(StopReason::Disconnected)
        );
    }

    #[test]
    fn test_sink_closed_stops_loop() {
        let mut h = harness();
        h.sink.closed.store(true, Ordering::SeqCst);
        assert_eq!(
            h.acquisition.step(),
            LoopState::Stopping(StopReason::SinkClosed)
        );
        h.acquisition.step();
        // close() is still called on an already closed sink.
        assert_eq!(h.sink.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_reason_priority() {
        let mut h = harness();
        h.sink.closed.store(true, Ordering::SeqCst);
        h.lost_tx
            .send(ConnectionLost {
                reason: LossReason::EndOfStream,
            })
            .unwrap();
        h.cancel.cancel();
        assert_eq!(
            h.acquisition.step(),
            LoopState::Stopping(StopReason::Interrupted)
        );

        let mut h = harness();
        h.sink.closed.store(true, Ordering::SeqCst);
        h.lost_tx
            .send(ConnectionLost {
                reason: LossReason::EndOfStream,
            })
            .unwrap();
        assert_eq!(
            h.acquisition.step(),
            LoopState::Stopping(StopReason::Disconnected)
        );
    }

    #[test]
    fn test_run_observes_cancel_within_one_interval() {
        let poll = Duration::from_millis(20);
        let h = harness();
        let mut sink = h.sink.clone();
        sink.sleep = true;
        let mut acquisition = AcquisitionLoop::from_parts(
            sink,
            Arc::clone(&h.mailbox),
            h.acquisition.connection_lost,
            ScanToPointCloud::new(8, 0.0),
            h.cancel.clone(),
        )
        .with_config(AcquisitionConfig::default().with_poll_interval(poll));
        let _lost_tx = h.lost_tx;

        let runner = thread::spawn(move || acquisition.run());
        thread::sleep(Duration::from_millis(100));

        let cancelled_at = Instant::now();
        h.cancel.cancel();
        let report = runner.join().unwrap();

        assert_eq!(report.stop_reason, StopReason::Interrupted);
        assert!(report.cycles >= 1);
        assert!(cancelled_at.elapsed() < poll * 3);
    }
}
