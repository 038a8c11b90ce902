//! Linux host introspection.
//!
//! ## Sources
//!
//! * Wireless interface and signal level: `/proc/net/wireless`.
//! * Network name: `iwgetid -r`, falling back to `nmcli`.
//! * Interface MAC: `/sys/class/net/<iface>/address`.
//! * Host UUID: `/etc/machine-id` (systemd), then the D-Bus copy.
//!
//! Hostname and host UUID are read once at startup.  The network name is
//! looked up at most every [`NETWORK_NAME_REFRESH`].

use std::fs;
use std::time::Duration;

use uuid::Uuid;

use super::{
    hostname, non_empty, primary_ip, run_trimmed, ConnectionMetadata, HostFacts, HostInfo, Refreshing,
};

const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

const NETWORK_NAME_REFRESH: Duration = Duration::from_secs(30);

pub struct LinuxHostInfo {
    hostname: Option<String>,
    host_uuid: Option<String>,
    network_name: Refreshing<Option<String>>,
}

impl LinuxHostInfo {
    pub fn new() -> Self {
        Self::with_identity(hostname(), machine_uuid())
    }

    fn with_identity(hostname: Option<String>, host_uuid: Option<String>) -> Self {
        Self {
            hostname,
            host_uuid,
            network_name: Refreshing::new(NETWORK_NAME_REFRESH),
        }
    }
}

impl HostInfo for LinuxHostInfo {
    fn metadata(&self) -> ConnectionMetadata {
        let wireless = fs::read_to_string("/proc/net/wireless")
            .ok()
            .and_then(|s| parse_proc_wireless(&s));

        let local_mac = wireless.as_ref().and_then(|(iface, _)| {
            fs::read_to_string(format!("/sys/class/net/{iface}/address"))
                .ok()
                .and_then(|s| non_empty(&s))
        });

        HostFacts {
            hostname: self.hostname.clone(),
            ip_address: primary_ip().map(|ip| ip.to_string()),
            network_name: self.network_name.get_or_refresh(network_name),
            local_mac,
            signal_level: wireless.map(|(_, level)| format!("{level} dBm")),
            host_uuid: self.host_uuid.clone(),
        }
        .into_metadata()
    }
}

fn network_name() -> Option<String> {
    if let Some(ssid) = run_trimmed("iwgetid", &["-r"]) {
        return Some(ssid);
    }
    run_trimmed("nmcli", &["-t", "-f", "active,ssid", "dev", "wifi"])
        .and_then(|out| parse_nmcli_active_ssid(&out))
}

fn machine_uuid() -> Option<String> {
    MACHINE_ID_PATHS.iter().find_map(|path| {
        let raw = fs::read_to_string(path).ok()?;
        let id = non_empty(&raw)?;
        Some(
            Uuid::parse_str(&id)
                .map(|u| u.to_string())
                .unwrap_or(id),
        )
    })
}

/// First interface in `/proc/net/wireless` and its signal level (dBm).
///
/// ```text
/// Inter-| sta-|   Quality        |   Discarded packets
///  face | tus | link level noise |  nwid  crypt   frag
///  wlan0: 0000   54.  -56.  -256        0      0      0
/// ```
pub fn parse_proc_wireless(contents: &str) -> Option<(String, i32)> {
    contents.lines().skip(2).find_map(|line| {
        let (iface, rest) = line.split_once(':')?;
        let level = rest.split_whitespace().nth(2)?;
        let level = level.trim_end_matches('.').parse::<f64>().ok()?;
        Some((iface.trim().to_string(), level as i32))
    })
}

/// SSID of the active connection in `nmcli -t -f active,ssid dev wifi` output.
pub fn parse_nmcli_active_ssid(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("yes:"))
        .and_then(non_empty)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_WIRELESS: &str = "Inter-| sta-|   Quality        |   Discarded packets               | Missed | WE\n face | tus | link level noise |  nwid  crypt   frag  retry   misc | beacon | 22\n wlp2s0: 0000   54.  -56.  -256        0      0      0      0     12        0\n";

    #[test]
    fn test_parse_proc_wireless() {
        assert_eq!(
            parse_proc_wireless(PROC_WIRELESS),
            Some(("wlp2s0".to_string(), -56))
        );
    }

    #[test]
    fn test_parse_proc_wireless_without_interfaces() {
        let header_only: String = PROC_WIRELESS.lines().take(2).collect::<Vec<_>>().join("\n");
        assert_eq!(parse_proc_wireless(&header_only), None);
    }

    #[test]
    fn test_parse_nmcli_active_ssid() {
        let out = "no:Neighbour\nyes:Home Net\nno:\n";
        assert_eq!(parse_nmcli_active_ssid(out).as_deref(), Some("Home Net"));
        assert_eq!(parse_nmcli_active_ssid("no:Other\n"), None);
    }

    #[test]
    fn test_identity_is_read_once_and_reused() {
        let host = LinuxHostInfo::with_identity(
            Some("pi".to_string()),
            Some("0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0".to_string()),
        );
        for _ in 0..2 {
            let meta = host.metadata();
            assert_eq!(meta.hostname, "pi");
            assert_eq!(meta.host_uuid, "0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0");
        }
    }
}
