//! Command-line behavior of `tcp-acquisition`.

use std::process::{Command, Output};
use std::time::Duration;

use r2000_mock_server::{DeviceBehavior, MockR2000, ServerConfig, ServerHandle, ERROR_INVALID_VALUE};

fn tcp_acquisition(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tcp-acquisition"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("binary runs")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Refuses every parameter change.
struct RejectingBehavior;

impl DeviceBehavior for RejectingBehavior {
    fn error_code(&self, command: &str) -> i32 {
        if command == "set_parameter" {
            ERROR_INVALID_VALUE
        } else {
            0
        }
    }
}

/// Streams for a while, then closes the data connection.
struct ClosingBehavior {
    checks_left: u32,
}

impl DeviceBehavior for ClosingBehavior {
    fn should_drop_data_connection(&mut self) -> bool {
        if self.checks_left == 0 {
            return true;
        }
        self.checks_left -= 1;
        false
    }
}

fn spawn_mock<B: DeviceBehavior>(behavior: B) -> ServerHandle {
    let config = ServerConfig::new().with_poll_interval(Duration::from_millis(5));
    MockR2000::new(config, behavior).expect("mock binds").spawn()
}

#[test]
fn test_missing_address_is_a_usage_error() {
    let output = tcp_acquisition(&[]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("--address"));
}

#[test]
fn test_invalid_address_is_rejected() {
    let output = tcp_acquisition(&["--address", "999.1.1.1"]);
    assert!(!output.status.success());

    let output = tcp_acquisition(&["-a", "scanner.local"]);
    assert!(!output.status.success());
}

#[test]
fn test_help_succeeds() {
    let output = tcp_acquisition(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--address"));
}

#[test]
fn test_configuration_failure_exits_with_failure() {
    let server = spawn_mock(RejectingBehavior);
    let port = server.http_port().to_string();

    let output = tcp_acquisition(&["-a", "127.0.0.1", "--http-port", &port]);

    assert!(!output.status.success());
    assert!(stderr(&output).contains("configuration"));
    assert_eq!(server.active_handles(), 0);
}

#[test]
fn test_device_loss_ends_run_successfully() {
    let server = spawn_mock(ClosingBehavior { checks_left: 100 });
    let port = server.http_port().to_string();

    let output = tcp_acquisition(&["-a", "127.0.0.1", "--http-port", &port]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(server.parameter("samples_per_scan").as_deref(), Some("7200"));
    assert!(server.commands().contains(&"start_scanoutput".to_string()));
}
