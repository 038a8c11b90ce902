//! macOS host introspection.
//!
//! ## Sources
//!
//! 1. Wi-Fi device via `networksetup -listallhardwareports`.
//! 2. Network name via `networksetup -getairportnetwork <dev>`.
//! 3. MAC via `networksetup -getmacaddress <dev>`.
//! 4. Signal level via `system_profiler SPAirPortDataType`.  This takes
//!    seconds, so it runs at most every [`SIGNAL_REFRESH`] and only the
//!    first "Signal / Noise" line is used.
//! 5. Host UUID via `ioreg -rd1 -c IOPlatformExpertDevice`.
//!
//! Device, MAC, hostname and host UUID are read once at startup.

use std::time::Duration;

use super::{
    find_field, hostname, primary_ip, run, run_trimmed, ConnectionMetadata, HostFacts, HostInfo, Refreshing,
};

const SIGNAL_REFRESH: Duration = Duration::from_secs(60);

pub struct MacOsHostInfo {
    device: String,
    hostname: Option<String>,
    local_mac: Option<String>,
    host_uuid: Option<String>,
    signal_level: Refreshing<Option<String>>,
}

impl MacOsHostInfo {
    pub fn new() -> Self {
        let device = Self::wifi_device();
        let local_mac = run_trimmed("networksetup", &["-getmacaddress", &device])
            .and_then(|out| find_field(&out, "Ethernet Address"))
            .and_then(|v| v.split_whitespace().next().map(str::to_string));
        Self {
            hostname: hostname(),
            local_mac,
            host_uuid: run_trimmed("ioreg", &["-rd1", "-c", "IOPlatformExpertDevice"])
                .and_then(|out| parse_platform_uuid(&out)),
            signal_level: Refreshing::new(SIGNAL_REFRESH),
            device,
        }
    }

    fn wifi_device() -> String {
        match run("networksetup", &["-listallhardwareports"]) {
            Ok(out) => parse_wifi_device(&out).unwrap_or_else(|| {
                log::debug!("Could not auto-detect Wi-Fi device; assuming en0");
                "en0".to_string()
            }),
            Err(e) => {
                log::debug!("{e}");
                "en0".to_string()
            }
        }
    }
}

impl HostInfo for MacOsHostInfo {
    fn metadata(&self) -> ConnectionMetadata {
        HostFacts {
            hostname: self.hostname.clone(),
            ip_address: primary_ip().map(|ip| ip.to_string()),
            network_name: run_trimmed("networksetup", &["-getairportnetwork", &self.device])
                .and_then(|out| parse_airport_network(&out)),
            local_mac: self.local_mac.clone(),
            signal_level: self.signal_level.get_or_refresh(|| {
                run_trimmed("system_profiler", &["SPAirPortDataType"])
                    .and_then(|out| find_field(&out, "Signal / Noise"))
            }),
            host_uuid: self.host_uuid.clone(),
        }
        .into_metadata()
    }
}

/// Device name of the "Wi-Fi" hardware port.
///
/// ```text
/// Hardware Port: Wi-Fi
/// Device: en0
/// Ethernet Address: ...
/// ```
pub fn parse_wifi_device(output: &str) -> Option<String> {
    let mut found_wifi = false;
    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("Hardware Port:") {
            found_wifi = trimmed.contains("Wi-Fi") || trimmed.contains("AirPort");
            continue;
        }
        if found_wifi {
            if let Some(dev) = trimmed.strip_prefix("Device:") {
                return Some(dev.trim().to_string());
            }
        }
    }
    None
}

/// `Current Wi-Fi Network: <ssid>`; anything else means not associated.
pub fn parse_airport_network(output: &str) -> Option<String> {
    find_field(output, "Current Wi-Fi Network")
        .or_else(|| find_field(output, "Current AirPort Network"))
}

/// `"IOPlatformUUID" = "XXXXXXXX-..."`
pub fn parse_platform_uuid(output: &str) -> Option<String> {
    output
        .lines()
        .find(|line| line.contains("\"IOPlatformUUID\""))
        .and_then(|line| line.split('=').nth(1))
        .map(|v| v.trim().trim_matches('"').to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wifi_device() {
        let out = "\nHardware Port: Thunderbolt Bridge\nDevice: bridge0\nEthernet Address: N/A\n\nHardware Port: Wi-Fi\nDevice: en1\nEthernet Address: a4:83:e7:00:00:01\n";
        assert_eq!(parse_wifi_device(out).as_deref(), Some("en1"));
        assert_eq!(parse_wifi_device("Hardware Port: Ethernet\nDevice: en0\n"), None);
    }

    #[test]
    fn test_parse_airport_network() {
        assert_eq!(
            parse_airport_network("Current Wi-Fi Network: Office 5G").as_deref(),
            Some("Office 5G")
        );
        assert_eq!(
            parse_airport_network("You are not associated with an AirPort network."),
            None
        );
    }

    #[test]
    fn test_parse_platform_uuid() {
        let out = "  | {\n    \"IOPlatformSerialNumber\" = \"C02XXXX\"\n    \"IOPlatformUUID\" = \"564D1A2B-0000-1111-2222-333344445555\"\n";
        assert_eq!(
            parse_platform_uuid(out).as_deref(),
            Some("564D1A2B-0000-1111-2222-333344445555")
        );
    }
}
