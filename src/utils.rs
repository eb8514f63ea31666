use std::path::PathBuf;

use clap::Parser;
use sysinfo::{System, SystemExt};

use crate::ecc::DEFAULT_EDAC_ROOT;
use crate::orchestrator::RunConfig;
use crate::report::DEFAULT_RESULT_FILE;
use crate::tests::row_hammer::DEFAULT_ITERATIONS;
use crate::{log_info_fmt, log_warn_fmt};

pub const DEFAULT_LOG_DIR: &str = "/var/log/ramcheck/";
pub const LOG_FILE_NAME: &str = "ramcheck.log";

#[derive(Parser, Debug)]
#[command(
    name = "ramcheck",
    version,
    about = "Comprehensive RAM test: address lines, walking bits, JEDEC march, bandwidth, row hammer and ECC",
    long_about = None
)]
pub struct Args {
    #[arg(value_parser = parse_memory_mb,
          help = "Memory to test; plain numbers are MB, K/M/G suffixes accepted (e.g. 512, 2G)")]
    pub memory_mb: usize,

    #[arg(value_parser = clap::value_parser!(u64).range(1..),
          help = "Nominal test duration in seconds (drives the bandwidth phase length)")]
    pub duration_seconds: u64,

    #[clap(short = 'L', long = "log-path", default_value = DEFAULT_LOG_DIR,
           help = "Directory for the log file (default: /var/log/ramcheck/ramcheck.log)")]
    pub log_path: String,

    #[clap(short = 'o', long = "result-file", default_value = DEFAULT_RESULT_FILE,
           help = "Where to write the KEY=VALUE result file")]
    pub result_file: PathBuf,

    #[clap(long = "edac-root", default_value = DEFAULT_EDAC_ROOT,
           help = "Root of the EDAC sysfs tree used for ECC counters")]
    pub edac_root: PathBuf,

    #[clap(long = "row-hammer-iterations", default_value_t = DEFAULT_ITERATIONS,
           help = "Aggressor write iterations per row spacing")]
    pub row_hammer_iterations: u64,

    #[clap(short = 'c', long = "core", help = "Pin the test thread to this logical core")]
    pub core: Option<usize>,

    #[clap(short = 'v', long = "verbose", help = "Show debug messages on the console")]
    pub verbose: bool,
}

impl Args {
    /// `-L` names a directory; the file name inside it is fixed.
    pub fn log_file_path(&self) -> String {
        format!("{}/{}", self.log_path.trim_end_matches('/'), LOG_FILE_NAME)
    }

    pub fn to_run_config(&self) -> RunConfig {
        RunConfig {
            row_hammer_iterations: self.row_hammer_iterations,
            edac_root: self.edac_root.clone(),
            ..RunConfig::new(self.memory_mb, self.duration_seconds)
        }
    }
}

/// Parses a memory size into whole MB. No suffix means MB.
fn parse_memory_mb(s: &str) -> Result<usize, String> {
    let upper = s.trim().to_uppercase();
    let s = upper.strip_suffix('B').unwrap_or(&upper);

    let (num_str, kib): (&str, u64) = if let Some(n) = s.strip_suffix('K') {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix('G') {
        (n, 1024 * 1024)
    } else {
        (s, 1024)
    };

    let mb = num_str
        .parse::<u64>()
        .map(|n| n.saturating_mul(kib) / 1024)
        .map_err(|_| format!("Invalid memory size: {}", s))?;
    if mb == 0 {
        return Err(format!("Memory size must be at least 1 MB: {}", s));
    }
    usize::try_from(mb).map_err(|_| format!("Memory size too large: {}", s))
}

/// `(total, free)` memory in MB as reported by the OS.
pub fn memory_info_mb() -> (u64, u64) {
    let mut system = System::new();
    system.refresh_memory();
    // sysinfo reports KB
    (system.total_memory() / 1024, system.free_memory() / 1024)
}

/// Logs the system memory picture and warns when the request cannot fit in
/// free memory. Returns whether it fits.
pub fn check_memory_request(memory_mb: usize) -> bool {
    let (total_mb, free_mb) = memory_info_mb();
    log_info_fmt!("System memory info:");
    log_info_fmt!("  Total memory: {:.2} GB", total_mb as f64 / 1024.0);
    log_info_fmt!("  Free memory: {:.2} GB", free_mb as f64 / 1024.0);

    if memory_mb as u64 > free_mb {
        log_warn_fmt!(
            "[!] Requested {} MB exceeds free memory ({} MB); phases may swap or fail to allocate",
            memory_mb, free_mb
        );
        return false;
    }
    true
}
