//! The scan loop.
//!
//! Alternates between **Scanning** (discover → ingest → assemble → deliver)
//! and **Idle** (sleep for the inter-cycle interval) until the running flag
//! is cleared.  One cycle always runs to completion before the next starts,
//! and the flag is only honoured between cycles, so an in-flight delivery is
//! never cut short.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::delivery::{DeliveryClient, DeliveryOutcome, Transport};
use crate::platform::HostInfo;
use crate::registry::DeviceRegistry;
use crate::scanner::{Discovery, ScanConfig};
use crate::snapshot::{self, SnapshotAssembler};

/// Granularity at which Idle re-checks the running flag.
const IDLE_TICK: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Scanning,
    Idle,
}

/// What a cycle did.
#[derive(Debug)]
pub enum CycleReport {
    /// Every scan pass failed; nothing was assembled or sent.
    ScanFailed,
    Completed {
        /// Raw sightings over all passes, duplicates included.
        sightings: usize,
        seen: usize,
        included: usize,
        excluded: usize,
        pruned: usize,
        /// Records still held after pruning.
        tracked: usize,
        delivery: DeliveryOutcome,
        elapsed: Duration,
    },
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleReport::ScanFailed => write!(f, "aborted, no scan pass succeeded"),
            CycleReport::Completed {
                sightings,
                seen,
                included,
                excluded,
                pruned,
                tracked,
                delivery,
                elapsed,
            } => write!(
                f,
                "{sightings} sightings, {seen} devices, {included} reported, {excluded} excluded, \
                 {pruned} pruned, {tracked} tracked, {} after {} attempts, {elapsed:.1?}",
                if delivery.is_delivered() { "delivered" } else { "not delivered" },
                delivery.attempts(),
            ),
        }
    }
}

pub struct SchedulerConfig {
    pub scan: ScanConfig,
    /// Sleep between cycles.
    pub interval: Duration,
    /// Print the device table after each assembly.
    pub print_summary: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan: ScanConfig::default(),
            interval: Duration::from_secs(5),
            print_summary: true,
        }
    }
}

pub struct ScanScheduler<T: Transport> {
    cfg: SchedulerConfig,
    discovery: Box<dyn Discovery>,
    host: Box<dyn HostInfo>,
    registry: DeviceRegistry,
    assembler: SnapshotAssembler,
    delivery: DeliveryClient<T>,
    state: SchedulerState,
    cycles: u64,
}

impl<T: Transport> ScanScheduler<T> {
    pub fn new(
        cfg: SchedulerConfig,
        discovery: Box<dyn Discovery>,
        host: Box<dyn HostInfo>,
        registry: DeviceRegistry,
        assembler: SnapshotAssembler,
        delivery: DeliveryClient<T>,
    ) -> Self {
        Self {
            cfg,
            discovery,
            host,
            registry,
            assembler,
            delivery,
            state: SchedulerState::Scanning,
            cycles: 0,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    #[cfg(test)]
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Run until `running` is cleared.
    pub fn run(&mut self, running: &AtomicBool) {
        let mut delivered = 0u64;
        while running.load(Ordering::Relaxed) {
            match self.state {
                SchedulerState::Scanning => {
                    if let CycleReport::Completed { delivery, .. } = self.run_cycle() {
                        if delivery.is_delivered() {
                            delivered += 1;
                        }
                    }
                    self.state = SchedulerState::Idle;
                }
                SchedulerState::Idle => {
                    self.idle(running);
                    self.state = SchedulerState::Scanning;
                }
            }
        }
        log::info!(
            "Scan loop stopped after {} cycles, {delivered} snapshots delivered",
            self.cycles
        );
    }

    fn idle(&self, running: &AtomicBool) {
        let until = Instant::now() + self.cfg.interval;
        loop {
            let now = Instant::now();
            if now >= until || !running.load(Ordering::Relaxed) {
                break;
            }
            std::thread::sleep(IDLE_TICK.min(until - now));
        }
    }

    /// One full Scanning phase.
    pub fn run_cycle(&mut self) -> CycleReport {
        self.cycles += 1;
        let cycle = self.registry.begin_cycle();
        let started = Instant::now();

        let passes = self.cfg.scan.passes.max(1);
        let mut ok_passes = 0;
        let mut sightings = 0;
        for pass in 1..=passes {
            match self.discovery.discover(self.cfg.scan.duration) {
                Ok(found) => {
                    ok_passes += 1;
                    sightings += found.len();
                    for s in &found {
                        self.registry.ingest(s);
                    }
                    log::debug!("Cycle {cycle} pass {pass}/{passes}: {} sightings", found.len());
                }
                Err(e) => log::warn!("Cycle {cycle} pass {pass}/{passes} failed: {e}"),
            }
        }

        if ok_passes == 0 {
            let report = CycleReport::ScanFailed;
            log::warn!("Cycle {cycle} {report}");
            return report;
        }

        let pruned = self.registry.prune();
        if pruned > 0 {
            log::info!("Pruned {pruned} stale devices");
        }

        let seen = self.registry.current_cycle().count();
        let snapshot = self
            .assembler
            .assemble(self.registry.current_cycle(), self.host.metadata());
        if self.cfg.print_summary {
            snapshot::print_summary(&snapshot);
        }
        let included = snapshot.devices.len();
        let excluded = snapshot.excluded;

        let delivery = self.delivery.deliver(snapshot);
        let report = CycleReport::Completed {
            sightings,
            seen,
            included,
            excluded,
            pruned,
            tracked: self.registry.len(),
            delivery,
            elapsed: started.elapsed(),
        };
        log::info!("Cycle {cycle}: {report}");
        report
    }
}
