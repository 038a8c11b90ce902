//! Platform-specific host and network introspection.
//!
//! Every field is best-effort: anything that cannot be determined is
//! reported as `"Unknown"` and never aborts a scan cycle.

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "windows")]
pub mod windows;

use std::cell::RefCell;
use std::io;
use std::net::{IpAddr, UdpSocket};
use std::process::Command;
use std::time::{Duration, Instant};

use serde::Serialize;

const UNKNOWN: &str = "Unknown";

/// Host/network block attached to every snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionMetadata {
    pub hostname: String,
    pub ip_address: String,
    pub network_name: String,
    pub network_type: String,
    pub local_mac: String,
    pub signal_level: String,
    pub host_uuid: String,
}

impl ConnectionMetadata {
    /// All fields set to `"Unknown"`.
    #[cfg(test)]
    pub fn unknown() -> Self {
        Self {
            hostname: UNKNOWN.to_string(),
            ip_address: UNKNOWN.to_string(),
            network_name: UNKNOWN.to_string(),
            network_type: UNKNOWN.to_string(),
            local_mac: UNKNOWN.to_string(),
            signal_level: UNKNOWN.to_string(),
            host_uuid: UNKNOWN.to_string(),
        }
    }
}

/// Raw lookup results; `None` means "could not determine".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostFacts {
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    pub network_name: Option<String>,
    pub local_mac: Option<String>,
    pub signal_level: Option<String>,
    pub host_uuid: Option<String>,
}

impl HostFacts {
    /// Fill gaps with `"Unknown"`.  The network type is `WiFi` whenever a
    /// wireless network name is known.
    pub fn into_metadata(self) -> ConnectionMetadata {
        fn or_unknown(field: &str, value: Option<String>) -> String {
            value.unwrap_or_else(|| {
                log::debug!("Host metadata field {field} unavailable");
                UNKNOWN.to_string()
            })
        }
        let network_type = if self.network_name.is_some() { "WiFi" } else { UNKNOWN };
        ConnectionMetadata {
            hostname: or_unknown("hostname", self.hostname),
            ip_address: or_unknown("ip_address", self.ip_address),
            network_name: or_unknown("network_name", self.network_name),
            network_type: network_type.to_string(),
            local_mac: or_unknown("local_mac", self.local_mac),
            signal_level: or_unknown("signal_level", self.signal_level),
            host_uuid: or_unknown("host_uuid", self.host_uuid),
        }
    }
}

/// Source of host metadata.
pub trait HostInfo {
    fn metadata(&self) -> ConnectionMetadata;
}

/// Return the platform-appropriate [`HostInfo`].
pub fn create_host_info() -> Box<dyn HostInfo> {
    #[cfg(target_os = "linux")]
    {
        Box::new(linux::LinuxHostInfo::new())
    }
    #[cfg(target_os = "macos")]
    {
        Box::new(macos::MacOsHostInfo::new())
    }
    #[cfg(target_os = "windows")]
    {
        Box::new(windows::WindowsHostInfo::new())
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        Box::new(GenericHostInfo)
    }
}

/// Fallback for platforms without a dedicated implementation: hostname and IP only.
#[allow(dead_code)]
pub struct GenericHostInfo;

impl HostInfo for GenericHostInfo {
    fn metadata(&self) -> ConnectionMetadata {
        HostFacts {
            hostname: hostname(),
            ip_address: primary_ip().map(|ip| ip.to_string()),
            ..Default::default()
        }
        .into_metadata()
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Run a command, returning an `io::Error` on non-zero exit.
pub(crate) fn run(cmd: &str, args: &[&str]) -> io::Result<String> {
    let output = Command::new(cmd).args(args).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("`{cmd} {}` failed: {stderr}", args.join(" ")),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a command and keep its trimmed stdout if non-empty.
pub(crate) fn run_trimmed(cmd: &str, args: &[&str]) -> Option<String> {
    match run(cmd, args) {
        Ok(out) => non_empty(&out),
        Err(e) => {
            log::debug!("{e}");
            None
        }
    }
}

pub(crate) fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

/// Host name via the `hostname` tool, present on every supported OS.
pub(crate) fn hostname() -> Option<String> {
    run_trimmed("hostname", &[])
}

/// Address of the interface holding the default route.
///
/// Connecting a UDP socket sends nothing; it only asks the kernel which
/// local address it would use.
pub(crate) fn primary_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

/// A slow lookup whose result is reused for `every` before re-running.
#[cfg_attr(not(any(target_os = "linux", target_os = "macos")), allow(dead_code))]
pub(crate) struct Refreshing<T> {
    every: Duration,
    slot: RefCell<Option<(Instant, T)>>,
}

#[cfg_attr(not(any(target_os = "linux", target_os = "macos")), allow(dead_code))]
impl<T: Clone> Refreshing<T> {
    pub(crate) fn new(every: Duration) -> Self {
        Self {
            every,
            slot: RefCell::new(None),
        }
    }

    pub(crate) fn get_or_refresh(&self, fetch: impl FnOnce() -> T) -> T {
        self.get_at(Instant::now(), fetch)
    }

    fn get_at(&self, now: Instant, fetch: impl FnOnce() -> T) -> T {
        let mut slot = self.slot.borrow_mut();
        match slot.as_ref() {
            Some((at, value)) if now.saturating_duration_since(*at) < self.every => value.clone(),
            _ => {
                let value = fetch();
                *slot = Some((now, value.clone()));
                value
            }
        }
    }
}

/// Find `key : value` in command output, as printed by `netsh`, `airport`
/// and friends.  Keys are matched exactly after trimming.
#[cfg_attr(not(any(target_os = "macos", target_os = "windows")), allow(dead_code))]
pub(crate) fn find_field(output: &str, key: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        if k.trim() == key {
            non_empty(v)
        } else {
            None
        }
    })
}
