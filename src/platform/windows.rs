//! Windows host introspection via `netsh` and `wmic`.
//!
//! `netsh wlan show interfaces` reports name, SSID, MAC ("Physical
//! address") and signal quality (percent) for the first WLAN interface.
//! The machine UUID comes from `wmic csproduct get uuid`, read once at
//! startup together with the hostname.

use super::{find_field, hostname, non_empty, primary_ip, run_trimmed, ConnectionMetadata, HostFacts, HostInfo};

pub struct WindowsHostInfo {
    hostname: Option<String>,
    host_uuid: Option<String>,
}

impl WindowsHostInfo {
    pub fn new() -> Self {
        Self {
            hostname: hostname(),
            host_uuid: run_trimmed("wmic", &["csproduct", "get", "uuid"])
                .and_then(|out| parse_wmic_uuid(&out)),
        }
    }
}

impl HostInfo for WindowsHostInfo {
    fn metadata(&self) -> ConnectionMetadata {
        let wlan = run_trimmed("netsh", &["wlan", "show", "interfaces"]).unwrap_or_default();
        HostFacts {
            hostname: self.hostname.clone(),
            ip_address: primary_ip().map(|ip| ip.to_string()),
            network_name: find_field(&wlan, "SSID"),
            local_mac: find_field(&wlan, "Physical address"),
            signal_level: find_field(&wlan, "Signal"),
            host_uuid: self.host_uuid.clone(),
        }
        .into_metadata()
    }
}

/// Second line of `wmic csproduct get uuid` (the first is the header).
pub fn parse_wmic_uuid(output: &str) -> Option<String> {
    output
        .lines()
        .skip(1)
        .find_map(non_empty)
        .filter(|v| !v.chars().all(|c| c == 'F' || c == '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_netsh_interfaces() {
        let out = "\nThere is 1 interface on the system:\n\n    Name                   : Wi-Fi\n    Physical address       : 3c:a9:f4:00:00:01\n    State                  : connected\n    SSID                   : Office\n    BSSID                  : 10:20:30:40:50:60\n    Signal                 : 87%\n";
        assert_eq!(find_field(out, "SSID").as_deref(), Some("Office"));
        assert_eq!(find_field(out, "Physical address").as_deref(), Some("3c:a9:f4:00:00:01"));
        assert_eq!(find_field(out, "Signal").as_deref(), Some("87%"));
    }

    #[test]
    fn test_parse_wmic_uuid() {
        let out = "UUID\r\n4C4C4544-0042-3510-8052-B4C04F4E3132\r\n\r\n";
        assert_eq!(
            parse_wmic_uuid(out).as_deref(),
            Some("4C4C4544-0042-3510-8052-B4C04F4E3132")
        );
        // Placeholder reported by some OEM firmware.
        assert_eq!(
            parse_wmic_uuid("UUID\nFFFFFFFF-FFFF-FFFF-FFFF-FFFFFFFFFFFF\n"),
            None
        );
    }
}
