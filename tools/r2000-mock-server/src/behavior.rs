//! Behavior trait for customizing mock device responses.

use std::time::Duration;

use crate::constants::ERROR_SUCCESS;

/// Behavior hooks for customizing the mock device.
///
/// The server holds the behavior behind a mutex shared by the command thread
/// and the streaming threads, so hooks should return quickly.
pub trait DeviceBehavior: Send + 'static {
    /// Called for every command before it is processed.
    fn on_command(&mut self, _command: &str, _params: &[(String, String)]) {}

    /// Whether to answer a command.
    ///
    /// Return `false` to simulate a silent device: the request is read and
    /// the connection is held open without a reply.
    fn should_respond(&self, _command: &str) -> bool {
        true
    }

    /// Error code to answer a command with instead of processing it.
    fn error_code(&self, _command: &str) -> i32 {
        ERROR_SUCCESS
    }

    /// Delay before answering a command.
    fn simulated_latency(&self) -> Duration {
        Duration::ZERO
    }

    /// Whether scan data should currently be sent.
    ///
    /// Return `false` to keep data connections open but quiet.
    fn should_stream(&self) -> bool {
        true
    }

    /// Check if open data connections should be dropped.
    ///
    /// Implementations should clear their "drop" flag when returning `true`.
    fn should_drop_data_connection(&mut self) -> bool {
        false
    }

    /// Distance in mm reported for sample `index` of scan `scan_number`.
    fn sample_distance(&self, _scan_number: u16, index: usize) -> u32 {
        1000 + (index % 500) as u32
    }
}

/// A behavior that answers everything successfully and streams steadily.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleBehavior;

impl DeviceBehavior for SimpleBehavior {}
