//! Device deduplication.
//!
//! Every hardware address maps to exactly one [`DeviceRecord`] for as long
//! as it keeps being sighted.  Repeated sightings, whether within a scan
//! pass, across passes of the same cycle, or across cycles, update that
//! record in place: the RSSI is re-smoothed and name/vendor/category are
//! re-resolved only when the new sighting carries different information.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::classify::{self, Category};
use crate::distance::{DistanceModel, UNKNOWN_DISTANCE};
use crate::scanner::{normalize_address, BeaconSighting};
use crate::smoothing::{SignalSmoother, SmootherConfig};

/// Namespace for address-derived identifiers.  Changing it changes every
/// identifier ever emitted.
const IDENTITY_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0x1f, 0x3a, 0x52, 0x9c, 0x0e, 0x4d, 0x8a, 0xb2, 0x17, 0x5e, 0xc4, 0x90, 0x2d, 0x71, 0xf3,
]);

/// Derive the stable identifier for a hardware address.
///
/// Name-based (v5) UUID over the normalised address: the same hardware
/// yields the same identifier in every run.
pub fn derive_identity(address: &str) -> Uuid {
    Uuid::new_v5(&IDENTITY_NAMESPACE, normalize_address(address).as_bytes())
}

/// Everything known about one device.
#[derive(Debug)]
pub struct DeviceRecord {
    pub address: String,
    pub name: Option<String>,
    /// Last raw RSSI sample (0 = unknown).
    pub rssi: i16,
    smoother: SignalSmoother,
    pub distance_m: f64,
    pub manufacturer: Option<String>,
    pub category: Category,
    pub id: Uuid,
    pub sightings: u64,
    pub last_seen: Instant,
    last_cycle: u64,
}

impl DeviceRecord {
    fn new(address: String, smoother_cfg: SmootherConfig, now: Instant, cycle: u64) -> Self {
        let id = derive_identity(&address);
        Self {
            address,
            name: None,
            rssi: 0,
            smoother: SignalSmoother::new(smoother_cfg),
            distance_m: UNKNOWN_DISTANCE,
            manufacturer: None,
            category: Category::Unknown,
            id,
            sightings: 0,
            last_seen: now,
            last_cycle: cycle,
        }
    }

    /// Smoothed RSSI, `None` until a non-zero sample has been seen.
    pub fn smoothed_rssi(&self) -> Option<f64> {
        self.smoother.estimate()
    }

    fn apply(&mut self, sighting: &BeaconSighting, model: &dyn DistanceModel) {
        self.sightings += 1;
        self.rssi = sighting.rssi;

        // 0 is "unknown": keep the previous estimate rather than pulling it
        // toward a bogus value.
        if sighting.rssi != 0 {
            let smoothed = self.smoother.update(sighting.rssi);
            self.distance_m = model.estimate(smoothed);
        }

        if let Some(name) = &sighting.name {
            if self.name.as_deref() != Some(name.as_str()) {
                self.name = Some(name.clone());
                self.category = classify::categorize(self.name.as_deref());
            }
        }

        if let Some(vendor) = classify::resolve_payload_vendor(&sighting.manufacturer_data) {
            if self.manufacturer.as_deref() != Some(vendor.as_str()) {
                self.manufacturer = Some(vendor);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub smoother: SmootherConfig,
    /// Records not sighted for this long are pruned.  Zero disables pruning.
    pub ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            smoother: SmootherConfig::default(),
            ttl: Duration::from_secs(300),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct DeviceRegistry {
    cfg: RegistryConfig,
    model: Box<dyn DistanceModel>,
    records: BTreeMap<String, DeviceRecord>,
    cycle: u64,
}

impl DeviceRegistry {
    pub fn new(cfg: RegistryConfig, model: Box<dyn DistanceModel>) -> Self {
        Self {
            cfg,
            model,
            records: BTreeMap::new(),
            cycle: 0,
        }
    }

    /// Start a new scan cycle.  Records ingested from here on count as seen
    /// in this cycle.
    pub fn begin_cycle(&mut self) -> u64 {
        self.cycle += 1;
        self.cycle
    }

    /// Merge a sighting into its record, creating it on first sight.
    pub fn ingest(&mut self, sighting: &BeaconSighting) -> &DeviceRecord {
        self.ingest_at(sighting, Instant::now())
    }

    fn ingest_at(&mut self, sighting: &BeaconSighting, now: Instant) -> &DeviceRecord {
        let address = normalize_address(&sighting.address);
        let cycle = self.cycle;
        let smoother_cfg = self.cfg.smoother;
        let record = self.records.entry(address).or_insert_with_key(|addr| {
            log::debug!("New device {addr}");
            DeviceRecord::new(addr.clone(), smoother_cfg, now, cycle)
        });
        record.apply(sighting, self.model.as_ref());
        record.last_seen = now;
        record.last_cycle = cycle;
        record
    }

    /// Drop records not sighted within the TTL.  Returns how many went.
    pub fn prune(&mut self) -> usize {
        self.prune_at(Instant::now())
    }

    fn prune_at(&mut self, now: Instant) -> usize {
        if self.cfg.ttl.is_zero() {
            return 0;
        }
        let ttl = self.cfg.ttl;
        let before = self.records.len();
        self.records
            .retain(|_, r| now.duration_since(r.last_seen) < ttl);
        before - self.records.len()
    }

    /// Records sighted during the current cycle, in address order.
    pub fn current_cycle(&self) -> impl Iterator<Item = &DeviceRecord> {
        let cycle = self.cycle;
        self.records.values().filter(move |r| r.last_cycle == cycle)
    }

    #[cfg(test)]
    pub fn get(&self, address: &str) -> Option<&DeviceRecord> {
        self.records.get(&normalize_address(address))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::LogDistanceModel;

    fn registry(ttl: Duration) -> DeviceRegistry {
        DeviceRegistry::new(
            RegistryConfig {
                ttl,
                ..Default::default()
            },
            Box::new(LogDistanceModel::default()),
        )
    }

    fn sighting(address: &str, name: Option<&str>, rssi: i16, codes: &[u16]) -> BeaconSighting {
        BeaconSighting {
            address: address.to_string(),
            name: name.map(str::to_string),
            rssi,
            manufacturer_data: codes.iter().map(|&c| (c, Vec::new())).collect(),
        }
    }

    #[test]
    fn test_identity_is_deterministic() {
        let a = derive_identity("AA:BB:CC:DD:EE:FF");
        let b = derive_identity("AA:BB:CC:DD:EE:FF");
        assert_eq!(a, b);
        assert_eq!(a.get_version_num(), 5);
        // Fixed value: must not change between releases.
        assert_eq!(a.to_string(), "f2579690-aa23-5f5a-bd53-266a49539fe4");
        assert_eq!(
            derive_identity(" aa:bb:cc:dd:ee:ff").to_string(),
            "f2579690-aa23-5f5a-bd53-266a49539fe4"
        );
    }

    #[test]
    fn test_identity_ignores_case_and_whitespace() {
        assert_eq!(
            derive_identity("aa:bb:cc:dd:ee:ff "),
            derive_identity("AA:BB:CC:DD:EE:FF")
        );
        assert_ne!(
            derive_identity("AA:BB:CC:DD:EE:FF"),
            derive_identity("AA:BB:CC:DD:EE:FE")
        );
    }

    #[test]
    fn test_ingest_is_idempotent() {
        let mut reg = registry(Duration::ZERO);
        reg.begin_cycle();
        let s = sighting("AA:BB:CC:DD:EE:FF", Some("HRM-200"), -70, &[0x004C]);
        let first_id = reg.ingest(&s).id;
        let rec = reg.ingest(&s);
        assert_eq!(rec.id, first_id);
        assert_eq!(rec.sightings, 2);
        assert_eq!(rec.name.as_deref(), Some("HRM-200"));
        assert_eq!(rec.manufacturer.as_deref(), Some("Apple, Inc."));
        assert_eq!(rec.category, Category::HeartRateMonitor);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_case_variants_share_a_record() {
        let mut reg = registry(Duration::ZERO);
        reg.begin_cycle();
        reg.ingest(&sighting("aa:bb:cc:dd:ee:ff", None, -60, &[]));
        reg.ingest(&sighting("AA:BB:CC:DD:EE:FF", None, -61, &[]));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_missing_fields_keep_previous_resolution() {
        let mut reg = registry(Duration::ZERO);
        reg.begin_cycle();
        reg.ingest(&sighting("11:22:33:44:55:66", Some("Bose QC45"), -65, &[0x009E]));
        let rec = reg.ingest(&sighting("11:22:33:44:55:66", None, -66, &[]));
        assert_eq!(rec.name.as_deref(), Some("Bose QC45"));
        assert_eq!(rec.category, Category::Bose);
        assert_eq!(rec.manufacturer.as_deref(), Some("Bose Corporation"));
    }

    #[test]
    fn test_changed_name_is_reclassified() {
        let mut reg = registry(Duration::ZERO);
        reg.begin_cycle();
        reg.ingest(&sighting("11:22:33:44:55:66", Some("TMP-1"), -65, &[]));
        let rec = reg.ingest(&sighting("11:22:33:44:55:66", Some("BPM-1"), -65, &[]));
        assert_eq!(rec.category, Category::BloodPressureMonitor);
    }

    #[test]
    fn test_rssi_is_smoothed_per_device() {
        let mut reg = registry(Duration::ZERO);
        reg.begin_cycle();
        reg.ingest(&sighting("AA:AA:AA:AA:AA:AA", None, -40, &[]));
        reg.ingest(&sighting("BB:BB:BB:BB:BB:BB", None, -90, &[]));
        let a = reg.ingest(&sighting("AA:AA:AA:AA:AA:AA", None, -50, &[]));
        let smoothed = a.smoothed_rssi().unwrap();
        assert!(smoothed < -40.0 && smoothed > -50.0);
        let b = reg.get("BB:BB:BB:BB:BB:BB").unwrap();
        assert_eq!(b.smoothed_rssi(), Some(-90.0));
    }

    #[test]
    fn test_zero_rssi_keeps_unknown_distance() {
        let mut reg = registry(Duration::ZERO);
        reg.begin_cycle();
        let rec = reg.ingest(&sighting("AA:AA:AA:AA:AA:AA", None, 0, &[]));
        assert_eq!(rec.distance_m, UNKNOWN_DISTANCE);
        assert_eq!(rec.smoothed_rssi(), None);

        reg.ingest(&sighting("AA:AA:AA:AA:AA:AA", None, -59, &[]));
        let rec = reg.ingest(&sighting("AA:AA:AA:AA:AA:AA", None, 0, &[]));
        assert!((rec.distance_m - 1.0).abs() < 1e-9);
        assert_eq!(rec.rssi, 0);
    }

    #[test]
    fn test_current_cycle_filters_old_records() {
        let mut reg = registry(Duration::ZERO);
        reg.begin_cycle();
        reg.ingest(&sighting("AA:AA:AA:AA:AA:AA", None, -60, &[]));
        reg.ingest(&sighting("BB:BB:BB:BB:BB:BB", None, -60, &[]));
        reg.begin_cycle();
        reg.ingest(&sighting("BB:BB:BB:BB:BB:BB", None, -60, &[]));
        let seen: Vec<_> = reg.current_cycle().map(|r| r.address.as_str()).collect();
        assert_eq!(seen, vec!["BB:BB:BB:BB:BB:BB"]);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_prune_respects_ttl() {
        let mut reg = registry(Duration::from_secs(60));
        reg.begin_cycle();
        let t0 = Instant::now();
        reg.ingest_at(&sighting("AA:AA:AA:AA:AA:AA", None, -60, &[]), t0);
        reg.ingest_at(
            &sighting("BB:BB:BB:BB:BB:BB", None, -60, &[]),
            t0 + Duration::from_secs(50),
        );
        assert_eq!(reg.prune_at(t0 + Duration::from_secs(70)), 1);
        assert!(reg.get("AA:AA:AA:AA:AA:AA").is_none());
        assert!(reg.get("BB:BB:BB:BB:BB:BB").is_some());
    }

    #[test]
    fn test_zero_ttl_never_prunes() {
        let mut reg = registry(Duration::ZERO);
        reg.begin_cycle();
        let t0 = Instant::now();
        reg.ingest_at(&sighting("AA:AA:AA:AA:AA:AA", None, -60, &[]), t0);
        assert_eq!(reg.prune_at(t0 + Duration::from_secs(100_000)), 0);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_pruned_device_returns_with_same_identity() {
        let mut reg = registry(Duration::from_secs(1));
        reg.begin_cycle();
        let t0 = Instant::now();
        let s = sighting("AA:AA:AA:AA:AA:AA", None, -60, &[]);
        let id = reg.ingest_at(&s, t0).id;
        reg.prune_at(t0 + Duration::from_secs(5));
        assert!(reg.is_empty());
        let rec = reg.ingest_at(&s, t0 + Duration::from_secs(6));
        assert_eq!(rec.id, id);
        assert_eq!(rec.sightings, 1);
    }
}
