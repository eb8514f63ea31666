// ================================================================================================
// Aggregate results, verdict and result file
// ================================================================================================

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use crate::ecc::EccDelta;
use crate::error::{RamTestError, Result};
use crate::logger;
use crate::tests::{Phase, TestOutcome};
use crate::{log_error_fmt, log_info_fmt, log_success_fmt, log_warn_fmt};

/// Where the default sink writes the `KEY=VALUE` result file.
pub const DEFAULT_RESULT_FILE: &str = "/tmp/comprehensive_ram_test_result.txt";

pub const EXIT_PASSED: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ERROR: i32 = 2;
pub const EXIT_CANCELLED: i32 = 130;

#[derive(Debug, Clone, PartialEq)]
pub enum PhaseStatus {
    Completed(TestOutcome),
    /// The phase never ran; the string says why.
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseReport {
    pub phase: Phase,
    /// Size of the block the phase was given (or would have been given), in MiB.
    pub budget_mb: usize,
    pub status: PhaseStatus,
}

impl PhaseReport {
    pub fn completed(phase: Phase, budget_mb: usize, outcome: TestOutcome) -> Self {
        Self { phase, budget_mb, status: PhaseStatus::Completed(outcome) }
    }

    pub fn skipped(phase: Phase, budget_mb: usize, reason: impl Into<String>) -> Self {
        Self { phase, budget_mb, status: PhaseStatus::Skipped(reason.into()) }
    }

    pub fn outcome(&self) -> Option<&TestOutcome> {
        match &self.status {
            PhaseStatus::Completed(outcome) => Some(outcome),
            PhaseStatus::Skipped(_) => None,
        }
    }

    pub fn errors(&self) -> u64 {
        self.outcome().map_or(0, |o| o.errors)
    }

    pub fn operations(&self) -> u64 {
        self.outcome().map_or(0, |o| o.operations)
    }

    /// `PASS`, `FAIL` or `SKIPPED`.
    pub fn status_label(&self) -> &'static str {
        match self.outcome() {
            Some(outcome) if outcome.passed() => "PASS",
            Some(_) => "FAIL",
            None => "SKIPPED",
        }
    }
}

/// Everything a run produced. Built once by the orchestrator, read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateReport {
    pub memory_mb: usize,
    pub duration_seconds: u64,
    /// One entry per phase, in execution order.
    pub phases: Vec<PhaseReport>,
    pub total_errors: u64,
    pub total_operations: u64,
    pub ecc_supported: bool,
    /// `None` when ECC is unsupported or the final reading was skipped.
    pub ecc_delta: Option<EccDelta>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl AggregateReport {
    pub fn new(
        memory_mb: usize,
        duration_seconds: u64,
        phases: Vec<PhaseReport>,
        ecc_supported: bool,
        ecc_delta: Option<EccDelta>,
        cancelled: bool,
        elapsed: Duration,
    ) -> Self {
        let total_errors = phases.iter().map(PhaseReport::errors).sum();
        let total_operations = phases.iter().map(PhaseReport::operations).sum();
        Self {
            memory_mb,
            duration_seconds,
            phases,
            total_errors,
            total_operations,
            ecc_supported,
            ecc_delta,
            cancelled,
            elapsed,
        }
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    /// No mismatches anywhere and, when ECC is monitored, no uncorrectable
    /// error delta (a reset UE counter counts against the run too).
    pub fn passed(&self) -> bool {
        let ecc_clean = match (&self.ecc_delta, self.ecc_supported) {
            (Some(delta), true) => delta.uncorrectable == 0,
            _ => true,
        };
        self.total_errors == 0 && ecc_clean
    }

    pub fn exit_code(&self) -> i32 {
        if self.cancelled {
            EXIT_CANCELLED
        } else if self.passed() {
            EXIT_PASSED
        } else {
            EXIT_FAILED
        }
    }

    pub fn result_label(&self) -> &'static str {
        if self.cancelled {
            "CANCELLED"
        } else if self.passed() {
            "PASSED"
        } else {
            "FAILED"
        }
    }

    fn bandwidth_metric(&self, key: &str) -> f64 {
        self.phase(Phase::Bandwidth)
            .and_then(PhaseReport::outcome)
            .and_then(|o| o.metric(key))
            .unwrap_or(0.0)
    }

    /// The result file contents, in file order.
    pub fn to_key_values(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = vec![
            ("RESULT".into(), self.result_label().into()),
            ("TOTAL_ERRORS".into(), self.total_errors.to_string()),
            ("TOTAL_OPERATIONS".into(), self.total_operations.to_string()),
            ("MEMORY_MB".into(), self.memory_mb.to_string()),
            ("DURATION".into(), self.duration_seconds.to_string()),
            ("ELAPSED_SECONDS".into(), format!("{:.1}", self.elapsed.as_secs_f64())),
        ];

        for report in &self.phases {
            let key = report.phase.report_key();
            pairs.push((format!("{}_ERRORS", key), report.errors().to_string()));
            pairs.push((format!("{}_OPERATIONS", key), report.operations().to_string()));
            pairs.push((format!("{}_STATUS", key), report.status_label().to_string()));
        }

        for (key, metric) in [
            ("WRITE_BANDWIDTH_MBPS", "write_mib_s"),
            ("READ_BANDWIDTH_MBPS", "read_mib_s"),
            ("RANDOM_BANDWIDTH_MBPS", "random_mib_s"),
            ("TOTAL_BANDWIDTH_MBPS", "total_mib_s"),
        ] {
            pairs.push((key.into(), format!("{:.1}", self.bandwidth_metric(metric))));
        }

        pairs.push(("ECC_SUPPORTED".into(), self.ecc_supported.to_string()));
        if let Some(delta) = &self.ecc_delta {
            pairs.push(("ECC_CORRECTABLE".into(), delta.correctable.to_string()));
            pairs.push(("ECC_UNCORRECTABLE".into(), delta.uncorrectable.to_string()));
            pairs.push(("ECC_ANOMALY".into(), delta.is_anomalous().to_string()));
        }
        pairs
    }
}

/// Destination of a finished report.
pub trait ReportSink {
    fn write_report(&mut self, report: &AggregateReport) -> Result<()>;
}

/// Writes `KEY=VALUE` lines, one per pair, overwriting the target file.
#[derive(Debug, Clone)]
pub struct KeyValueFileSink {
    path: PathBuf,
}

impl KeyValueFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn write_pairs(&self, pairs: &[(String, String)]) -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(&self.path)?);
        for (key, value) in pairs {
            writeln!(writer, "{}={}", key, value)?;
        }
        writer.flush()
    }
}

impl ReportSink for KeyValueFileSink {
    fn write_report(&mut self, report: &AggregateReport) -> Result<()> {
        self.write_pairs(&report.to_key_values())
            .map_err(|source| RamTestError::Report { path: self.path.clone(), source })?;
        log_info_fmt!("Results saved to: {}", self.path.display());
        Ok(())
    }
}

fn group_digits(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Logs the results table and, for a failed run, what each failing phase points at.
pub fn log_summary(report: &AggregateReport) {
    let rule = "=".repeat(80);
    let thin = "-".repeat(80);
    let elapsed = report.elapsed.as_secs_f64();

    logger::log_raw("");
    logger::log_raw(&rule);
    logger::log_raw("COMPREHENSIVE RAM TEST RESULTS");
    logger::log_raw(&rule);
    log_info_fmt!("Test Duration: {:.1} seconds ({:.1} minutes)", elapsed, elapsed / 60.0);
    log_info_fmt!("Memory Tested: {} MB", report.memory_mb);
    logger::log_raw("");
    logger::log_raw("TEST RESULTS BY METHOD:");
    logger::log_raw(&thin);

    match (&report.ecc_delta, report.ecc_supported) {
        (Some(delta), true) => {
            let status = if delta.uncorrectable == 0 { "PASS" } else { "FAIL" };
            logger::log_raw(&format!(
                "  {:24} {:8}  (CE: {}, UE: {})",
                "ECC Monitoring", status, delta.correctable, delta.uncorrectable
            ));
        }
        (None, true) => logger::log_raw(&format!("  {:24} {:8}  (final reading skipped)", "ECC Monitoring", "N/A")),
        (_, false) => logger::log_raw(&format!("  {:24} {:8}  (Not supported)", "ECC Monitoring", "N/A")),
    }

    for phase in &report.phases {
        let detail = match &phase.status {
            PhaseStatus::Completed(outcome) => {
                format!("({} ops, {} errors)", group_digits(outcome.operations), outcome.errors)
            }
            PhaseStatus::Skipped(reason) => format!("({})", reason),
        };
        logger::log_raw(&format!("  {:24} {:8}  {}", phase.phase.name(), phase.status_label(), detail));
    }

    logger::log_raw(&thin);
    logger::log_raw(&format!("  TOTAL OPERATIONS: {}", group_digits(report.total_operations)));
    logger::log_raw(&format!("  TOTAL ERRORS:     {}", report.total_errors));
    logger::log_raw("");

    if report.cancelled {
        log_warn_fmt!("COMPREHENSIVE RAM TEST: CANCELLED");
        log_warn_fmt!("[!] Run interrupted; only the completed phases above were evaluated");
    }

    if report.passed() {
        if !report.cancelled {
            log_success_fmt!("COMPREHENSIVE RAM TEST: PASSED");
        }
        log_success_fmt!("[+] No errors detected in the completed test methods");
    } else {
        log_error_fmt!("COMPREHENSIVE RAM TEST: FAILED");
        log_error_fmt!("[-] {} total errors detected", report.total_errors);
        log_error_fmt!("[-] HARDWARE INVESTIGATION REQUIRED");
        for phase in report.phases.iter().filter(|p| p.errors() > 0) {
            log_error_fmt!("    * {}", phase.phase.fault_hint());
        }
        if let Some(delta) = report.ecc_delta.as_ref().filter(|d| d.uncorrectable != 0) {
            log_error_fmt!("    * Uncorrectable ECC errors reported by the memory controller ({})", delta.uncorrectable);
        }
    }
}
