// The memory test algorithms. Each one takes a block it exclusively owns for the duration of the
// call and returns a `TestOutcome`; nothing is shared between phases.

pub mod address_line;

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

pub use address_line::AddressLineTest;
pub use bandwidth::MemoryBandwidthTest;
pub use jedec::JedecPatternTest;
pub use row_hammer::RowHammerTest;
pub use walking_bits::WalkingBitsTest;

/// Upper bound on the mismatching offsets kept in a [`TestOutcome`].
pub const MAX_RECORDED_FAILURES: usize = 16;

/// Address-line adjacency and walking-bit passes only cover this much of a block.
pub const PATTERN_WINDOW: usize = 1024 * 1024;

/// The five test phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    AddressLine,
    WalkingBits,
    Jedec,
    Bandwidth,
    RowHammer,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::AddressLine,
        Phase::WalkingBits,
        Phase::Jedec,
        Phase::Bandwidth,
        Phase::RowHammer,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Phase::AddressLine => "Address Line Test",
            Phase::WalkingBits => "Walking Bit Patterns",
            Phase::Jedec => "JEDEC Patterns",
            Phase::Bandwidth => "Memory Bandwidth",
            Phase::RowHammer => "Row Hammer Test",
        }
    }

    /// Prefix used for this phase in the `KEY=VALUE` result file.
    pub fn report_key(&self) -> &'static str {
        match self {
            Phase::AddressLine => "ADDRESS_LINE",
            Phase::WalkingBits => "WALKING_BITS",
            Phase::Jedec => "JEDEC",
            Phase::Bandwidth => "BANDWIDTH",
            Phase::RowHammer => "ROW_HAMMER",
        }
    }

    /// Fault category a failure of this phase points at.
    pub fn fault_hint(&self) -> &'static str {
        match self {
            Phase::AddressLine => "Address line failures detected - possible connection issues",
            Phase::WalkingBits => "Stuck or weak bits detected",
            Phase::Jedec => "JEDEC pattern failures - basic memory cell or coupling issues",
            Phase::Bandwidth => "Memory controller errors under bandwidth stress",
            Phase::RowHammer => "Row hammer vulnerability - memory susceptible to bit flips",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one test phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestOutcome {
    pub errors: u64,
    pub operations: u64,
    pub duration: Duration,
    pub derived_metrics: BTreeMap<String, f64>,
    /// Byte offsets of the first mismatches, at most [`MAX_RECORDED_FAILURES`].
    pub failing_offsets: Vec<usize>,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        self.errors == 0
    }

    pub fn metric(&self, key: &str) -> Option<f64> {
        self.derived_metrics.get(key).copied()
    }
}

/// Running error/operation counters for one phase.
#[derive(Debug)]
pub(crate) struct Tally {
    errors: u64,
    operations: u64,
    failing_offsets: Vec<usize>,
    log_limit: u64,
}

impl Tally {
    /// `log_limit` is how many mismatches the caller gets told to log.
    pub(crate) fn new(log_limit: u64) -> Self {
        Self {
            errors: 0,
            operations: 0,
            failing_offsets: Vec::new(),
            log_limit,
        }
    }

    #[inline]
    pub(crate) fn op(&mut self) {
        self.operations += 1;
    }

    #[inline]
    pub(crate) fn ops(&mut self, n: u64) {
        self.operations += n;
    }

    /// Counts a mismatch at `offset`. Returns true while the mismatch should still be logged.
    pub(crate) fn record_error(&mut self, offset: usize) -> bool {
        self.errors += 1;
        if self.failing_offsets.len() < MAX_RECORDED_FAILURES {
            self.failing_offsets.push(offset);
        }
        self.errors <= self.log_limit
    }

    pub(crate) fn errors(&self) -> u64 {
        self.errors
    }

    pub(crate) fn operations(&self) -> u64 {
        self.operations
    }

    pub(crate) fn finish(self, started: Instant, derived_metrics: BTreeMap<String, f64>) -> TestOutcome {
        TestOutcome {
            errors: self.errors,
            operations: self.operations,
            duration: started.elapsed(),
            derived_metrics,
            failing_offsets: self.failing_offsets,
        }
    }
}

/// Number of bits needed to represent `value` (0 for 0).
pub(crate) fn bit_length(value: usize) -> u32 {
    usize::BITS - value.leading_zeros()
}

/// Simulated memory for unit tests: a plain byte vector, plus wrappers that inject faults.
#[cfg(test)]
pub(crate) mod sim {
    use crate::error::MemoryError;
    use crate::memory::{check_range, BlockProvider, MemoryAccess};

    #[derive(Debug, Clone)]
    pub struct VecMemory {
        pub bytes: Vec<u8>,
    }

    impl VecMemory {
        pub fn new(size: usize) -> Self {
            Self { bytes: vec![0; size] }
        }
    }

    impl MemoryAccess for VecMemory {
        fn len(&self) -> usize {
            self.bytes.len()
        }

        fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Result<(), MemoryError> {
            check_range(offset, buf.len(), self.len())?;
            buf.copy_from_slice(&self.bytes[offset..offset + buf.len()]);
            Ok(())
        }

        fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<(), MemoryError> {
            check_range(offset, data.len(), self.len())?;
            self.bytes[offset..offset + data.len()].copy_from_slice(data);
            Ok(())
        }
    }

    /// Hands out healthy [`VecMemory`] blocks.
    #[derive(Debug, Default)]
    pub struct VecProvider {
        pub allocations: Vec<usize>,
    }

    impl BlockProvider for VecProvider {
        type Block = VecMemory;

        fn allocate(&mut self, size: usize) -> Result<VecMemory, MemoryError> {
            if size == 0 || size % 8 != 0 {
                return Err(MemoryError::InvalidSize(size));
            }
            self.allocations.push(size);
            Ok(VecMemory::new(size))
        }
    }

    /// Every byte written with bit `stuck` set has bit `stuck_to` forced to the same value, and
    /// vice versa for reads: address bit `stuck` always follows bit `stuck_to`.
    pub struct ShortedAddressLine {
        pub inner: VecMemory,
        pub stuck: u32,
        pub stuck_to: u32,
    }

    impl ShortedAddressLine {
        fn translate(&self, offset: usize) -> usize {
            let source = (offset >> self.stuck_to) & 1;
            (offset & !(1 << self.stuck)) | (source << self.stuck)
        }
    }

    impl MemoryAccess for ShortedAddressLine {
        fn len(&self) -> usize {
            self.inner.len()
        }

        fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Result<(), MemoryError> {
            check_range(offset, buf.len(), self.len())?;
            for (i, b) in buf.iter_mut().enumerate() {
                *b = self.inner.bytes[self.translate(offset + i)];
            }
            Ok(())
        }

        fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<(), MemoryError> {
            check_range(offset, data.len(), self.len())?;
            for (i, &b) in data.iter().enumerate() {
                let physical = self.translate(offset + i);
                self.inner.bytes[physical] = b;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_length() {
        assert_eq!(bit_length(0), 0);
        assert_eq!(bit_length(1), 1);
        assert_eq!(bit_length(56), 6);
        assert_eq!(bit_length(64), 7);
    }

    #[test]
    fn test_tally_caps_recorded_offsets() {
        let mut tally = Tally::new(2);
        let mut logged = 0;
        for offset in 0..40 {
            tally.op();
            if tally.record_error(offset * 8) {
                logged += 1;
            }
        }
        assert_eq!(logged, 2);
        let outcome = tally.finish(Instant::now(), BTreeMap::new());
        assert_eq!(outcome.errors, 40);
        assert_eq!(outcome.operations, 40);
        assert_eq!(outcome.failing_offsets.len(), MAX_RECORDED_FAILURES);
        assert_eq!(outcome.failing_offsets[1], 8);
        assert!(!outcome.passed());
    }

    #[test]
    fn test_phase_order_and_keys() {
        assert_eq!(Phase::ALL[0], Phase::AddressLine);
        assert_eq!(Phase::ALL[4], Phase::RowHammer);
        assert_eq!(Phase::Jedec.report_key(), "JEDEC");
        assert_eq!(Phase::WalkingBits.to_string(), "Walking Bit Patterns");
    }
}
