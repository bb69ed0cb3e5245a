//! tcp-acquisition - stream scans from an R2000 and display them.
//!
//! Configures the scanner, opens a TCP scan data session and renders every
//! new scan until interrupted, until the viewer is closed or until the device
//! goes away.

use std::f64::consts::PI;
use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use r2000_scan::types::{
    HmiDisplayMode, Language, OperatingMode, PacketType, ScanDirection,
};
use r2000_scan::{
    AcquisitionLoop, CancellationFlag, Device, FailureReason, HmiDisplay, LogSink, Measure,
    RenderSink, RequestOutcome, ScanToPointCloud, SessionBuilder, SetParameters, StopReason,
    SurfaceConfig, TcpHandle,
};

const DEVICE_NAME: &str = "R2000";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

const SCAN_FREQUENCY: u32 = 35;
const SAMPLES_PER_SCAN: u32 = 7200;
const START_ANGLE: i32 = -1_800_000;
const WATCHDOG_TIMEOUT_MS: u32 = 5000;

#[derive(Parser)]
#[command(
    name = "tcp-acquisition",
    about = "Continuous scan acquisition from an R2000 laser scanner"
)]
struct Args {
    /// IPv4 address of the scanner
    #[arg(short, long)]
    address: Ipv4Addr,

    /// Port of the HTTP command interface
    #[arg(long, default_value_t = r2000_scan::device::DEFAULT_HTTP_PORT)]
    http_port: u16,
}

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("{0}: device busy")]
    Busy(&'static str),

    #[error("{component}: {reason}")]
    Failed {
        component: &'static str,
        reason: FailureReason,
    },

    #[error("{0}")]
    Setup(#[from] r2000_scan::Error),
}

fn check(component: &'static str, outcome: RequestOutcome) -> Result<(), StartupError> {
    match outcome {
        RequestOutcome::Success => Ok(()),
        RequestOutcome::Failure(reason) => Err(StartupError::Failed { component, reason }),
    }
}

fn run(args: &Args) -> Result<StopReason, StartupError> {
    let cancel = CancellationFlag::new();
    cancel.install_interrupt_handler()?;

    let device = Device::new(DEVICE_NAME, args.address).with_http_port(args.http_port);
    log::info!("configuring {}", device);

    let hmi = HmiDisplay::default()
        .unlock_hmi_button()
        .unlock_hmi_parameters()
        .with_hmi_language(Language::English)
        .with_hmi_display_mode(HmiDisplayMode::ApplicationText)
        .with_hmi_application_text_1("TCP Scan")
        .with_hmi_application_text_2("Acquisition");
    let measure = Measure::default()
        .with_operating_mode(OperatingMode::Measure)
        .with_scan_frequency(SCAN_FREQUENCY)
        .with_samples_per_scan(SAMPLES_PER_SCAN)
        .with_scan_direction(ScanDirection::Ccw);

    let request = SetParameters::new(&device)
        .submit(REQUEST_TIMEOUT, &[&hmi, &measure])
        .ok_or(StartupError::Busy("configuration"))?;
    let (outcome, _) = request.wait();
    check("configuration", outcome)?;

    let handle = TcpHandle::default()
        .with_packet_type(PacketType::A)
        .with_start_angle(START_ANGLE)
        .with_watchdog()
        .with_watchdog_timeout(WATCHDOG_TIMEOUT_MS);
    let request = SessionBuilder::new(handle)
        .build(&device, REQUEST_TIMEOUT)
        .ok_or(StartupError::Busy("session"))?;
    let (outcome, session) = request.wait();
    check("session", outcome)?;
    let session = session.ok_or(StartupError::Failed {
        component: "session",
        reason: FailureReason::Protocol("no session returned".to_string()),
    })?;

    let mut sink = LogSink::new();
    sink.initialize(&SurfaceConfig::default())?;

    let converter = ScanToPointCloud::new(SAMPLES_PER_SCAN, -PI);
    let report = AcquisitionLoop::new(sink, &session, converter, cancel).run();
    log::info!(
        "{} scans rendered, {} duplicate polls skipped",
        report.rendered,
        report.duplicates_skipped
    );
    Ok(report.stop_reason)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match run(&args) {
        Ok(reason) => {
            log::info!("shutting down: {}", reason);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("tcp-acquisition: {}", e);
            ExitCode::FAILURE
        }
    }
}
