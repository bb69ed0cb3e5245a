//! HTTP command interface client.
//!
//! Every command is a single `GET /cmd/<name>?<query>` request. The device
//! answers with a JSON object that always carries `error_code` and
//! `error_text`, plus command-specific fields.
//!
//! The client's timeout bounds a whole call, from connecting to reading the
//! last byte of the reply.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::device::Device;
use crate::error::{Error, Result};

/// Decoded JSON reply of a command.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandResponse {
    pub error_code: i32,
    #[serde(default)]
    pub error_text: String,
    /// Command-specific fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CommandResponse {
    /// Turn a non-zero `error_code` into [`Error::Device`].
    pub fn into_result(self) -> Result<Self> {
        if self.error_code != 0 {
            return Err(Error::Device {
                code: self.error_code,
                text: self.error_text,
            });
        }
        Ok(self)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.fields.get(key).and_then(Value::as_u64)
    }
}

/// A TCP scan data handle granted by `request_handle_tcp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleInfo {
    /// Port the scan data will be served on.
    pub port: u16,
    /// Opaque handle identifier used by the follow-up commands.
    pub handle: String,
}

impl HandleInfo {
    fn from_response(response: &CommandResponse) -> Result<Self> {
        let port = response
            .get_u64("port")
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| Error::protocol("request_handle_tcp reply has no valid port"))?;
        let handle = response
            .get_str("handle")
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::protocol("request_handle_tcp reply has no handle"))?;
        Ok(Self {
            port,
            handle: handle.to_string(),
        })
    }
}

/// Blocking client for the command interface of one device.
#[derive(Debug, Clone)]
pub struct CommandClient {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl CommandClient {
    /// Creates a client whose calls are each bounded by `timeout`.
    pub fn new(device: &Device, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| Error::http("building command client", e))?;
        Ok(Self {
            http,
            base_url: format!("http://{}/cmd", device.command_addr()),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a command and decode its reply.
    ///
    /// A reply with a non-zero `error_code` is returned as [`Error::Device`].
    pub fn call(&self, command: &str, params: &[(&str, String)]) -> Result<CommandResponse> {
        let url = format!("{}/{}", self.base_url, command);
        log::debug!("{} -> {} ({} params)", command, url, params.len());

        let reply = self
            .http
            .get(&url)
            .query(params)
            .send()
            .map_err(|e| Error::http(command, e))?;

        let status = reply.status();
        if status != StatusCode::OK {
            return Err(Error::protocol(format!("{}: HTTP status {}", command, status)));
        }

        let response: CommandResponse = reply.json().map_err(|e| {
            if e.is_decode() {
                Error::protocol(format!("{}: malformed reply: {}", command, e))
            } else {
                Error::http(format!("{}: reading reply", command), e)
            }
        })?;

        log::debug!(
            "{} <- error_code={} error_text={:?}",
            command,
            response.error_code,
            response.error_text
        );
        response.into_result()
    }

    /// Apply all `params` in a single transaction.
    pub fn set_parameter(&self, params: &[(&str, String)]) -> Result<()> {
        self.call("set_parameter", params).map(|_| ())
    }

    /// Request a TCP scan data handle configured by `params`.
    pub fn request_handle_tcp(&self, params: &[(&str, String)]) -> Result<HandleInfo> {
        let response = self.call("request_handle_tcp", params)?;
        HandleInfo::from_response(&response)
    }

    pub fn start_scanoutput(&self, handle: &str) -> Result<()> {
        self.call("start_scanoutput", &[("handle", handle.to_string())])
            .map(|_| ())
    }

    pub fn stop_scanoutput(&self, handle: &str) -> Result<()> {
        self.call("stop_scanoutput", &[("handle", handle.to_string())])
            .map(|_| ())
    }

    pub fn feed_watchdog(&self, handle: &str) -> Result<()> {
        self.call("feed_watchdog", &[("handle", handle.to_string())])
            .map(|_| ())
    }

    pub fn release_handle(&self, handle: &str) -> Result<()> {
        self.call("release_handle", &[("handle", handle.to_string())])
            .map(|_| ())
    }
}
