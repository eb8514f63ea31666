// Comprehensive RAM integrity tester.
//
// Runs five test phases over freshly allocated scratch memory (address lines,
// walking bits, JEDEC march algorithms, bandwidth stress, row hammer), brackets
// them with EDAC ECC counter readings, and produces an `AggregateReport` with
// a pass/fail verdict.

pub mod cpu_utils;
pub mod ecc;
pub mod error;
pub mod logger;
pub mod memory;
pub mod orchestrator;
pub mod report;
pub mod signals;
pub mod tests;
pub mod utils;

pub use ecc::{EccDelta, EccMonitor, EccSnapshot};
pub use error::{MemoryError, RamTestError, Result};
pub use memory::{BlockProvider, MemoryAccess, MemoryBlock, SystemMemory};
pub use orchestrator::{CancellationToken, ComprehensiveRamTest, RunConfig, Stage};
pub use report::{AggregateReport, KeyValueFileSink, PhaseReport, PhaseStatus, ReportSink};
pub use tests::{Phase, TestOutcome};
