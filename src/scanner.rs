//! Passive BLE discovery.
//!
//! The [`Discovery`] trait is the seam between the scan loop and the radio.
//! [`BleScanner`] implements it with `btleplug`, running each pass on a
//! private current-thread tokio runtime so the rest of the program stays
//! synchronous.

use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;
use std::time::Duration;

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::{Stream, StreamExt};
use tokio::runtime::Runtime;

use crate::error::ScanError;

/// One beacon observed during a scan pass.
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconSighting {
    /// Hardware address as reported by the stack (normalised on ingest).
    pub address: String,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// RSSI in dBm.  0 means unknown.
    pub rssi: i16,
    /// Manufacturer-specific data keyed by company identifier.
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
}

/// Source of beacon sightings.
pub trait Discovery {
    /// Listen for `duration` and return everything heard.
    fn discover(&mut self, duration: Duration) -> Result<Vec<BeaconSighting>, ScanError>;
}

/// Scan timing.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// How long each pass listens.
    pub duration: Duration,
    /// Passes per cycle.
    pub passes: u32,
    /// Allowance for adapter round-trips on top of `duration`.  A pass
    /// that has not finished by `duration + timeout` is abandoned.
    pub timeout: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(2),
            passes: 3,
            timeout: Duration::from_secs(10),
        }
    }
}

// ---------------------------------------------------------------------------
// btleplug adapter
// ---------------------------------------------------------------------------

pub struct BleScanner {
    runtime: Runtime,
    adapter: Adapter,
    timeout: Duration,
}

impl BleScanner {
    /// Open the first Bluetooth adapter.
    pub fn new(timeout: Duration) -> Result<Self, ScanError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let adapter = runtime.block_on(async {
            let manager = Manager::new().await?;
            let adapters = manager.adapters().await?;
            adapters.into_iter().next().ok_or(ScanError::NoAdapter)
        })?;

        match runtime.block_on(adapter.adapter_info()) {
            Ok(info) => log::info!("Using Bluetooth adapter {info}"),
            Err(e) => log::debug!("Adapter info unavailable: {e}"),
        }

        Ok(Self {
            runtime,
            adapter,
            timeout,
        })
    }

    /// Listen for `duration` and report only the peripherals that
    /// advertised during that window.  The stack's peripheral cache also
    /// holds devices that left long ago; those are skipped.
    async fn scan_pass(adapter: &Adapter, duration: Duration) -> Result<Vec<BeaconSighting>, ScanError> {
        let events = adapter.events().await?;
        adapter.start_scan(ScanFilter::default()).await?;
        let heard = collect_heard(events, duration, advertised_id).await;
        if let Err(e) = adapter.stop_scan().await {
            log::debug!("Failed to stop scan: {e}");
        }

        let mut sightings = Vec::with_capacity(heard.len());
        for id in heard {
            let p = match adapter.peripheral(&id).await {
                Ok(p) => p,
                Err(e) => {
                    log::debug!("Peripheral {id:?} vanished: {e}");
                    continue;
                }
            };
            let props = match p.properties().await {
                Ok(Some(props)) => props,
                Ok(None) => continue,
                Err(e) => {
                    log::debug!("No properties for {}: {e}", p.address());
                    continue;
                }
            };
            sightings.push(BeaconSighting {
                address: props.address.to_string(),
                name: props.local_name,
                rssi: props.rssi.unwrap_or(0),
                manufacturer_data: props.manufacturer_data.into_iter().collect(),
            });
        }
        Ok(sightings)
    }
}

impl Discovery for BleScanner {
    fn discover(&mut self, duration: Duration) -> Result<Vec<BeaconSighting>, ScanError> {
        let limit = pass_deadline(duration, self.timeout);
        let adapter = &self.adapter;
        self.runtime.block_on(async {
            tokio::time::timeout(limit, Self::scan_pass(adapter, duration))
                .await
                .map_err(|_| ScanError::Timeout(limit))?
        })
    }
}

/// Total budget for one pass: the listen window plus the round-trip allowance.
fn pass_deadline(duration: Duration, timeout: Duration) -> Duration {
    duration.saturating_add(timeout)
}

/// Peripheral behind an advertisement-bearing event.
fn advertised_id(event: CentralEvent) -> Option<PeripheralId> {
    match event {
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => Some(id),
        CentralEvent::ManufacturerDataAdvertisement { id, .. }
        | CentralEvent::ServiceDataAdvertisement { id, .. }
        | CentralEvent::ServicesAdvertisement { id, .. } => Some(id),
        _ => None,
    }
}

/// Drain `events` for `window`, keeping the distinct keys `key` extracts.
/// A stream that ends early still waits out the window.
async fn collect_heard<S, K, F>(mut events: S, window: Duration, mut key: F) -> HashSet<K>
where
    S: Stream + Unpin,
    K: Eq + Hash,
    F: FnMut(S::Item) -> Option<K>,
{
    let mut heard = HashSet::new();
    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.next() => match event {
                Some(event) => {
                    if let Some(k) = key(event) {
                        heard.insert(k);
                    }
                }
                None => {
                    (&mut deadline).await;
                    break;
                }
            },
        }
    }
    heard
}

// ---------------------------------------------------------------------------
// Address helpers
// ---------------------------------------------------------------------------

/// Canonical form used as the registry key: trimmed, upper-case.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_uppercase()
}

/// Check whether an address looks locally administered (randomised).
/// Bit 1 of the first octet is the U/L bit.
pub fn is_randomized_address(address: &str) -> bool {
    address
        .trim()
        .get(..2)
        .and_then(|octet| u8::from_str_radix(octet, 16).ok())
        .map(|b| b & 0x02 != 0)
        .unwrap_or(false)
}
