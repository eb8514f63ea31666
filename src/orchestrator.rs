// ================================================================================================
// ComprehensiveRamTest: runs the five phases in order and aggregates the outcome
// ================================================================================================
//
// Init -> EccBaseline -> AddressLine -> WalkingBits -> Jedec -> Bandwidth -> RowHammer
//      -> EccFinal -> Aggregate -> Done
//
// Every phase gets its own block from the `BlockProvider`, dropped before the next phase starts.
// The cancellation token is looked at only between phases; a running phase always finishes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::ecc::{EccMonitor, DEFAULT_EDAC_ROOT};
use crate::error::{RamTestError, Result};
use crate::logger;
use crate::memory::{BlockProvider, MIB};
use crate::report::{AggregateReport, PhaseReport};
use crate::tests::{
    row_hammer, AddressLineTest, JedecPatternTest, MemoryBandwidthTest, Phase, RowHammerTest, TestOutcome,
    WalkingBitsTest,
};
use crate::{log_error_fmt, log_info_fmt, log_success_fmt, log_warn_fmt};

/// Bandwidth phase length is `duration / BANDWIDTH_DURATION_DIVISOR` seconds...
pub const BANDWIDTH_DURATION_DIVISOR: u64 = 4;
/// ...capped here...
pub const BANDWIDTH_DURATION_CAP_SECS: u64 = 60;
/// ...and never shorter than this.
pub const BANDWIDTH_DURATION_FLOOR_SECS: u64 = 1;

/// Shared stop flag. Cloning hands out another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    EccBaseline,
    AddressLine,
    WalkingBits,
    Jedec,
    Bandwidth,
    RowHammer,
    EccFinal,
    Aggregate,
    Done,
}

impl From<Phase> for Stage {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::AddressLine => Stage::AddressLine,
            Phase::WalkingBits => Stage::WalkingBits,
            Phase::Jedec => Stage::Jedec,
            Phase::Bandwidth => Stage::Bandwidth,
            Phase::RowHammer => Stage::RowHammer,
        }
    }
}

/// Block size of one phase: `min(cap_mb, memory_mb / divisor)` MiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseBudget {
    pub divisor: usize,
    pub cap_mb: usize,
}

impl PhaseBudget {
    pub const fn new(divisor: usize, cap_mb: usize) -> Self {
        Self { divisor, cap_mb }
    }

    pub fn size_mb(&self, memory_mb: usize) -> usize {
        if self.divisor == 0 {
            return 0;
        }
        (memory_mb / self.divisor).min(self.cap_mb)
    }
}

/// Everything a run needs, resolved from the command line.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub memory_mb: usize,
    pub duration_seconds: u64,
    pub address_line: PhaseBudget,
    pub walking_bits: PhaseBudget,
    pub jedec: PhaseBudget,
    pub bandwidth: PhaseBudget,
    pub row_hammer: PhaseBudget,
    pub row_hammer_iterations: u64,
    pub edac_root: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            memory_mb: 1024,
            duration_seconds: 300,
            address_line: PhaseBudget::new(4, 200),
            walking_bits: PhaseBudget::new(4, 200),
            jedec: PhaseBudget::new(3, 300),
            bandwidth: PhaseBudget::new(2, 500),
            row_hammer: PhaseBudget::new(8, 100),
            row_hammer_iterations: row_hammer::DEFAULT_ITERATIONS,
            edac_root: PathBuf::from(DEFAULT_EDAC_ROOT),
        }
    }
}

impl RunConfig {
    pub fn new(memory_mb: usize, duration_seconds: u64) -> Self {
        Self { memory_mb, duration_seconds, ..Self::default() }
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory_mb == 0 {
            return Err(RamTestError::InvalidConfig("memory size must be at least 1 MB".into()));
        }
        if self.duration_seconds == 0 {
            return Err(RamTestError::InvalidConfig("duration must be at least 1 second".into()));
        }
        Ok(())
    }

    pub fn budget_mb(&self, phase: Phase) -> usize {
        let budget = match phase {
            Phase::AddressLine => self.address_line,
            Phase::WalkingBits => self.walking_bits,
            Phase::Jedec => self.jedec,
            Phase::Bandwidth => self.bandwidth,
            Phase::RowHammer => self.row_hammer,
        };
        budget.size_mb(self.memory_mb)
    }

    pub fn bandwidth_duration(&self) -> Duration {
        let secs = (self.duration_seconds / BANDWIDTH_DURATION_DIVISOR)
            .min(BANDWIDTH_DURATION_CAP_SECS)
            .max(BANDWIDTH_DURATION_FLOOR_SECS);
        Duration::from_secs(secs)
    }
}

pub struct ComprehensiveRamTest<P: BlockProvider> {
    config: RunConfig,
    provider: P,
    ecc: EccMonitor,
    stage: Stage,
}

impl<P: BlockProvider> ComprehensiveRamTest<P> {
    pub fn new(config: RunConfig, provider: P) -> Self {
        let ecc = EccMonitor::with_root(config.edac_root.clone());
        Self { config, provider, ecc, stage: Stage::Init }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Runs the whole suite. Mismatches end up in the report; only allocation
    /// and access failures come back as `Err`.
    pub fn run(&mut self, cancel: &CancellationToken) -> Result<AggregateReport> {
        self.config.validate()?;
        let started = Instant::now();
        self.stage = Stage::Init;
        self.log_header();

        self.stage = Stage::EccBaseline;
        let rule = "=".repeat(80);
        logger::log_raw(&rule);
        logger::log_raw("INITIALIZING ECC ERROR MONITORING");
        logger::log_raw(&rule);
        let ecc_supported = self.ecc.probe();
        let baseline = if ecc_supported {
            log_success_fmt!("[+] ECC monitoring initialized successfully");
            Some(self.ecc.snapshot())
        } else {
            log_warn_fmt!("[!] ECC monitoring not available on this system");
            log_info_fmt!("    (This is normal for non-ECC RAM)");
            None
        };

        let mut phases = Vec::with_capacity(Phase::ALL.len());
        let mut cancelled = false;
        for phase in Phase::ALL {
            let budget_mb = self.config.budget_mb(phase);
            if !cancelled && cancel.is_cancelled() {
                log_warn_fmt!("Stop requested, skipping remaining test phases");
                cancelled = true;
            }
            if cancelled {
                phases.push(PhaseReport::skipped(phase, budget_mb, "cancelled"));
                continue;
            }
            if budget_mb == 0 {
                log_warn_fmt!("[!] Skipping {}: {} MB leaves it no memory", phase, self.config.memory_mb);
                phases.push(PhaseReport::skipped(phase, 0, "no memory budget"));
                continue;
            }

            self.stage = Stage::from(phase);
            let outcome = self.run_phase(phase, budget_mb * MIB)?;
            phases.push(PhaseReport::completed(phase, budget_mb, outcome));
        }
        let ecc_delta = match baseline {
            Some(baseline) if !cancelled => {
                self.stage = Stage::EccFinal;
                logger::log_banner("CHECKING ECC ERRORS");
                let delta = EccMonitor::delta(&baseline, &self.ecc.snapshot());
                delta.log_changes();
                log_info_fmt!("  Correctable errors: {}", delta.correctable);
                log_info_fmt!("  Uncorrectable errors: {}", delta.uncorrectable);
                if delta.uncorrectable > 0 {
                    log_error_fmt!("[-] CRITICAL: {} uncorrectable ECC errors!", delta.uncorrectable);
                } else if delta.correctable > 0 {
                    log_warn_fmt!("[!] WARNING: {} correctable ECC errors", delta.correctable);
                    log_warn_fmt!("    Memory has weak cells that are being corrected by ECC");
                } else if !delta.is_anomalous() {
                    log_success_fmt!("[+] No ECC errors detected");
                }
                Some(delta)
            }
            Some(_) => {
                log_warn_fmt!("Skipping final ECC reading: run was cancelled");
                None
            }
            None => None,
        };

        self.stage = Stage::Aggregate;
        let report = AggregateReport::new(
            self.config.memory_mb,
            self.config.duration_seconds,
            phases,
            ecc_supported,
            ecc_delta,
            cancelled,
            started.elapsed(),
        );
        self.stage = Stage::Done;
        Ok(report)
    }

    fn run_phase(&mut self, phase: Phase, size: usize) -> Result<TestOutcome> {
        let mut block = self.provider.allocate(size)?;
        let outcome = match phase {
            Phase::AddressLine => AddressLineTest::new().run(&mut block)?,
            Phase::WalkingBits => WalkingBitsTest::new().run(&mut block)?,
            Phase::Jedec => JedecPatternTest::new().run(&mut block)?,
            Phase::Bandwidth => MemoryBandwidthTest::new(self.config.bandwidth_duration()).run(&mut block)?,
            Phase::RowHammer => RowHammerTest::new(self.config.row_hammer_iterations).run(&mut block)?,
        };
        Ok(outcome)
    }

    fn log_header(&self) {
        let rule = "=".repeat(80);
        logger::log_raw(&rule);
        logger::log_raw("COMPREHENSIVE RAM TEST SUITE");
        logger::log_raw(&rule);
        log_info_fmt!("Memory to test: {} MB", self.config.memory_mb);
        log_info_fmt!(
            "Test duration: {} seconds ({:.1} minutes)",
            self.config.duration_seconds,
            self.config.duration_seconds as f64 / 60.0
        );
        log_info_fmt!("Test phases:");
        for phase in Phase::ALL {
            log_info_fmt!("  * {} ({} MB)", phase, self.config.budget_mb(phase));
        }
        logger::log_raw("");
    }
}
