//! Snapshot assembly: exclusion rules, metadata, wire types.

use chrono::{SecondsFormat, Utc};
use colored::Colorize;
use serde::Serialize;

use crate::distance::UNKNOWN_DISTANCE;
use crate::platform::ConnectionMetadata;
use crate::registry::DeviceRecord;
use crate::scanner::is_randomized_address;

const UNKNOWN: &str = "Unknown";

/// One device as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceEntry {
    pub name: String,
    pub address: String,
    pub rssi: i16,
    pub distance: f64,
    pub manufacturer: String,
    pub uuid: String,
    pub timestamp: String,
    pub category: String,
    /// Filtered RSSI behind `distance`.  Console only.
    #[serde(skip)]
    pub smoothed_rssi: Option<f64>,
}

/// One delivery payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub timestamp: String,
    pub connection_metadata: ConnectionMetadata,
    pub devices: Vec<DeviceEntry>,
    /// Records dropped by the exclusion policy this cycle.
    #[serde(skip)]
    pub excluded: usize,
}

/// Devices to leave out of every snapshot.
#[derive(Debug, Clone)]
pub struct ExclusionPolicy {
    /// Vendor-name prefixes, e.g. `Apple` matches `Apple, Inc.`.
    pub deny_vendors: Vec<String>,
    /// Substrings of the advertised name.
    pub deny_names: Vec<String>,
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self {
            deny_vendors: vec!["Apple".to_string(), "HP".to_string()],
            deny_names: Vec::new(),
        }
    }
}

impl ExclusionPolicy {
    pub fn excludes(&self, record: &DeviceRecord) -> bool {
        let vendor_denied = record.manufacturer.as_deref().is_some_and(|vendor| {
            self.deny_vendors
                .iter()
                .any(|deny| vendor.starts_with(deny.as_str()))
        });
        let name_denied = record.name.as_deref().is_some_and(|name| {
            self.deny_names
                .iter()
                .any(|deny| name.contains(deny.as_str()))
        });
        vendor_denied || name_denied
    }
}

/// Render a timestamp the way the collector expects it.
pub fn iso_timestamp(t: chrono::DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct SnapshotAssembler {
    policy: ExclusionPolicy,
}

impl SnapshotAssembler {
    pub fn new(policy: ExclusionPolicy) -> Self {
        Self { policy }
    }

    /// Build a snapshot from this cycle's records.
    ///
    /// Every included device carries the assembly time, not its sighting
    /// time.  Nearest devices come first; unknown distances go last.
    pub fn assemble<'a>(
        &self,
        records: impl IntoIterator<Item = &'a DeviceRecord>,
        metadata: ConnectionMetadata,
    ) -> Snapshot {
        let timestamp = iso_timestamp(Utc::now());
        let mut excluded = 0;
        let mut devices = Vec::new();

        for record in records {
            if self.policy.excludes(record) {
                log::debug!(
                    "Excluding {} ({})",
                    record.address,
                    record.manufacturer.as_deref().unwrap_or(UNKNOWN)
                );
                excluded += 1;
                continue;
            }
            devices.push(DeviceEntry {
                name: record.name.clone().unwrap_or_else(|| UNKNOWN.to_string()),
                address: record.address.clone(),
                rssi: record.rssi,
                distance: record.distance_m,
                manufacturer: record
                    .manufacturer
                    .clone()
                    .unwrap_or_else(|| UNKNOWN.to_string()),
                uuid: record.id.to_string(),
                timestamp: timestamp.clone(),
                category: record.category.to_string(),
                smoothed_rssi: record.smoothed_rssi(),
            });
        }

        devices.sort_by(|a, b| {
            let known = |d: &DeviceEntry| d.distance != UNKNOWN_DISTANCE;
            known(b)
                .cmp(&known(a))
                .then(
                    a.distance
                        .partial_cmp(&b.distance)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then_with(|| a.address.cmp(&b.address))
        });

        Snapshot {
            timestamp,
            connection_metadata: metadata,
            devices,
            excluded,
        }
    }
}

/// Print a summary table to stdout.
pub fn print_summary(snapshot: &Snapshot) {
    if snapshot.devices.is_empty() {
        println!(
            "{}",
            format!(
                "  No reportable devices ({} excluded).",
                snapshot.excluded
            )
            .dimmed()
        );
        return;
    }

    println!(
        "\n{}",
        format!(
            "  ── {} devices at {} ({} excluded) ──",
            snapshot.devices.len(),
            snapshot.timestamp,
            snapshot.excluded
        )
        .bold()
        .cyan()
    );
    println!(
        "  {:<24}  {:<17}  {:>8}  {:>10}  {:>9}  {:<22}  {}",
        "Name".bold(),
        "Address".bold(),
        "RSSI".bold(),
        "Smoothed".bold(),
        "Distance".bold(),
        "Category".bold(),
        "Manufacturer".bold(),
    );

    for d in &snapshot.devices {
        let rssi_str = if d.rssi == 0 {
            "?".to_string()
        } else {
            format!("{} dBm", d.rssi)
        };
        let dist_str = if d.distance == UNKNOWN_DISTANCE {
            "?".to_string()
        } else if d.distance < 1.0 {
            format!("{:.2} m", d.distance)
        } else {
            format!("{:.1} m", d.distance)
        };
        let address = if is_randomized_address(&d.address) {
            format!("{} {}", d.address, "(randomized)".dimmed())
        } else {
            d.address.clone()
        };

        println!(
            "  {:<24}  {:<17}  {:>8}  {:>10}  {:>9}  {:<22}  {}",
            d.name.yellow(),
            address,
            rssi_str.green(),
            smoothed_cell(d.smoothed_rssi).green(),
            dist_str.magenta(),
            d.category,
            d.manufacturer,
        );
    }
    println!();
}

fn smoothed_cell(smoothed: Option<f64>) -> String {
    match smoothed {
        Some(v) => format!("{v:.1} dBm"),
        None => "?".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::LogDistanceModel;
    use crate::registry::{DeviceRegistry, RegistryConfig};
    use crate::scanner::BeaconSighting;

    fn sighting(address: &str, name: Option<&str>, rssi: i16, codes: &[u16]) -> BeaconSighting {
        BeaconSighting {
            address: address.to_string(),
            name: name.map(str::to_string),
            rssi,
            manufacturer_data: codes.iter().map(|&c| (c, Vec::new())).collect(),
        }
    }

    fn registry_with(sightings: &[BeaconSighting]) -> DeviceRegistry {
        let mut reg = DeviceRegistry::new(
            RegistryConfig::default(),
            Box::new(LogDistanceModel::default()),
        );
        reg.begin_cycle();
        for s in sightings {
            reg.ingest(s);
        }
        reg
    }

    #[test]
    fn test_denied_vendor_is_excluded() {
        let reg = registry_with(&[sighting(
            "11:22:33:44:55:66",
            Some("Samsung Galaxy Buds"),
            -60,
            &[0x004C],
        )]);
        let snap = SnapshotAssembler::new(ExclusionPolicy::default())
            .assemble(reg.current_cycle(), ConnectionMetadata::unknown());
        assert!(snap.devices.is_empty());
        assert_eq!(snap.excluded, 1);
    }

    #[test]
    fn test_denied_name_is_excluded() {
        let reg = registry_with(&[
            sighting("11:22:33:44:55:66", Some("Living room TV"), -60, &[0x0075]),
            sighting("11:22:33:44:55:67", Some("Bose QC45"), -60, &[0x009E]),
        ]);
        let policy = ExclusionPolicy {
            deny_vendors: Vec::new(),
            deny_names: vec!["TV".to_string()],
        };
        let snap = SnapshotAssembler::new(policy)
            .assemble(reg.current_cycle(), ConnectionMetadata::unknown());
        assert_eq!(snap.devices.len(), 1);
        assert_eq!(snap.devices[0].name, "Bose QC45");
        assert_eq!(snap.devices[0].category, "Bose Device");
        assert_eq!(snap.devices[0].manufacturer, "Bose Corporation");
    }

    #[test]
    fn test_unresolved_fields_render_unknown() {
        let reg = registry_with(&[sighting("11:22:33:44:55:66", None, -60, &[])]);
        let snap = SnapshotAssembler::new(ExclusionPolicy::default())
            .assemble(reg.current_cycle(), ConnectionMetadata::unknown());
        let d = &snap.devices[0];
        assert_eq!(d.name, "Unknown");
        assert_eq!(d.manufacturer, "Unknown");
        assert_eq!(d.category, "Unknown Device");
    }

    #[test]
    fn test_devices_share_assembly_timestamp() {
        let reg = registry_with(&[
            sighting("11:22:33:44:55:66", None, -60, &[]),
            sighting("11:22:33:44:55:67", None, -70, &[]),
        ]);
        let snap = SnapshotAssembler::new(ExclusionPolicy::default())
            .assemble(reg.current_cycle(), ConnectionMetadata::unknown());
        assert_eq!(snap.devices.len(), 2);
        assert!(snap.devices.iter().all(|d| d.timestamp == snap.timestamp));
        assert!(snap.timestamp.ends_with('Z'));
    }

    #[test]
    fn test_nearest_first_unknown_last() {
        let reg = registry_with(&[
            sighting("00:00:00:00:00:01", None, 0, &[]),
            sighting("00:00:00:00:00:02", None, -80, &[]),
            sighting("00:00:00:00:00:03", None, -50, &[]),
        ]);
        let snap = SnapshotAssembler::new(ExclusionPolicy::default())
            .assemble(reg.current_cycle(), ConnectionMetadata::unknown());
        let order: Vec<_> = snap.devices.iter().map(|d| d.address.as_str()).collect();
        assert_eq!(
            order,
            vec!["00:00:00:00:00:03", "00:00:00:00:00:02", "00:00:00:00:00:01"]
        );
        assert_eq!(snap.devices[2].distance, UNKNOWN_DISTANCE);
    }

    #[test]
    fn test_exclusion_is_reevaluated_each_cycle() {
        let mut reg = DeviceRegistry::new(
            RegistryConfig::default(),
            Box::new(LogDistanceModel::default()),
        );
        let policy = ExclusionPolicy {
            deny_vendors: Vec::new(),
            deny_names: vec!["Secret".to_string()],
        };
        let assembler = SnapshotAssembler::new(policy);

        reg.begin_cycle();
        reg.ingest(&sighting("11:22:33:44:55:66", Some("Secret tag"), -60, &[]));
        let snap = assembler.assemble(reg.current_cycle(), ConnectionMetadata::unknown());
        assert!(snap.devices.is_empty());

        reg.begin_cycle();
        reg.ingest(&sighting("11:22:33:44:55:66", Some("Public tag"), -60, &[]));
        let snap = assembler.assemble(reg.current_cycle(), ConnectionMetadata::unknown());
        assert_eq!(snap.devices.len(), 1);
    }

    #[test]
    fn test_wire_format_fields() {
        let reg = registry_with(&[sighting("11:22:33:44:55:66", Some("TMP-7"), -59, &[0x0059])]);
        let snap = SnapshotAssembler::new(ExclusionPolicy::default())
            .assemble(reg.current_cycle(), ConnectionMetadata::unknown());
        let json = serde_json::to_value(&snap).unwrap();

        let top: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert_eq!(top.len(), 3);
        for key in ["timestamp", "connection_metadata", "devices"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }

        let dev = &json["devices"][0];
        for key in [
            "name", "address", "rssi", "distance", "manufacturer", "uuid", "timestamp", "category",
        ] {
            assert!(dev.get(key).is_some(), "missing device field {key}");
        }
        assert_eq!(dev["rssi"], -59);
        assert_eq!(dev["category"], "Thermometer");
        assert_eq!(dev["manufacturer"], "Nordic Semiconductor ASA");
        assert_eq!(json["connection_metadata"]["hostname"], "Unknown");
    }

    #[test]
    fn test_smoothed_rssi_reaches_console_but_not_wire() {
        let reg = registry_with(&[
            sighting("11:22:33:44:55:66", Some("TMP-7"), -59, &[0x0059]),
            sighting("11:22:33:44:55:67", None, 0, &[]),
        ]);
        let snap = SnapshotAssembler::new(ExclusionPolicy::default())
            .assemble(reg.current_cycle(), ConnectionMetadata::unknown());
        assert_eq!(snap.devices[0].smoothed_rssi, Some(-59.0));
        assert_eq!(snap.devices[1].smoothed_rssi, None);

        let json = serde_json::to_value(&snap).unwrap();
        let dev = json["devices"][0].as_object().unwrap();
        assert_eq!(dev.len(), 8);
        assert!(!dev.contains_key("smoothed_rssi"));

        assert_eq!(smoothed_cell(Some(-61.26)), "-61.3 dBm");
        assert_eq!(smoothed_cell(None), "?");
    }
}
