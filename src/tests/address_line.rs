// Address line verification.
//
// Distinct address bits must select distinct storage cells. A stuck or shorted
// line makes two addresses land on the same cell, which shows up as a readback
// mismatch once both have been written.

use std::collections::BTreeMap;
use std::time::Instant;

use super::{bit_length, Tally, TestOutcome, PATTERN_WINDOW};
use crate::error::MemoryError;
use crate::logger;
use crate::memory::MemoryAccess;
use crate::{log_error_fmt, log_info_fmt};

/// Highest address bit exercised by the walking passes.
pub const MAX_ADDRESS_BITS: u32 = 24;

const WALKING_ONES_SEED: u32 = 0xAA55_AA55;
const WALKING_ZEROS_SEED: u32 = 0x55AA_55AA;

#[derive(Debug, Default, Clone, Copy)]
pub struct AddressLineTest;

impl AddressLineTest {
    pub fn new() -> Self {
        Self
    }

    /// Runs the walking-ones, walking-zeros and adjacency passes over `block`.
    pub fn run<M: MemoryAccess + ?Sized>(&self, block: &mut M) -> Result<TestOutcome, MemoryError> {
        logger::log_banner("ADDRESS LINE TESTING");
        let started = Instant::now();
        let size = block.len();
        let limit = size.saturating_sub(8);
        let max_bits = bit_length(limit).min(MAX_ADDRESS_BITS);
        let mut tally = Tally::new(10);

        log_info_fmt!("Testing address lines with {} byte block ({} address bits)...", size, max_bits);

        // Walking ones: one address bit set at a time.
        for bit in 0..max_bits {
            let offset = 1usize << bit;
            if offset >= limit {
                break;
            }
            let pattern = WALKING_ONES_SEED.wrapping_add(bit);
            block.write_u32(offset, pattern)?;
            tally.op();

            let read = block.read_u32(offset)?;
            tally.op();
            if read != pattern && tally.record_error(offset) {
                log_error_fmt!(
                    "  [!] Address line error at bit {} (offset {:#X}): expected {:#010X}, got {:#010X}",
                    bit, offset, pattern, read
                );
            }
        }

        // Walking zeros: all bits below max_bits set except one.
        let mask = (1usize << max_bits) - 1;
        for bit in 0..max_bits {
            let offset = mask ^ (1usize << bit);
            if offset >= limit {
                continue;
            }
            let pattern = WALKING_ZEROS_SEED.wrapping_add(bit);
            block.write_u32(offset, pattern)?;
            tally.op();

            let read = block.read_u32(offset)?;
            tally.op();
            if read != pattern && tally.record_error(offset) {
                log_error_fmt!(
                    "  [!] Address line error at inverted bit {} (offset {:#X}): expected {:#010X}, got {:#010X}",
                    bit, offset, pattern, read
                );
            }
        }

        // Adjacency: every word holds its own address, written first, verified after.
        log_info_fmt!("Testing for address line shorts...");
        let window = size.min(PATTERN_WINDOW) & !7;
        for offset in (0..window).step_by(8) {
            block.write_u64(offset, offset as u64)?;
            tally.op();
        }
        for offset in (0..window).step_by(8) {
            let read = block.read_u64(offset)?;
            tally.op();
            if read != offset as u64 && tally.record_error(offset) {
                log_error_fmt!("  [!] Address short at {:#X} (read back {:#X})", offset, read);
            }
        }

        let mut metrics = BTreeMap::new();
        metrics.insert("address_bits".to_string(), max_bits as f64);
        metrics.insert("adjacency_bytes".to_string(), window as f64);

        if tally.errors() == 0 {
            log_info_fmt!("[+] Address line test PASSED ({} operations)", tally.operations());
        } else {
            log_error_fmt!("[-] Address line test FAILED with {} errors", tally.errors());
        }
        Ok(tally.finish(started, metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBlock;
    use crate::tests::sim::{ShortedAddressLine, VecMemory};

    #[test]
    fn test_healthy_block_passes() {
        let mut block = MemoryBlock::new(2 * PATTERN_WINDOW).unwrap();
        let outcome = AddressLineTest::new().run(&mut block).unwrap();
        assert_eq!(outcome.errors, 0);
        assert!(outcome.operations >= outcome.errors);
        assert_eq!(outcome.metric("address_bits"), Some(21.0));
    }

    #[test]
    fn test_operation_count_small_block() {
        // 64 bytes: 6 walking-ones steps, 3 walking-zeros steps that fit below 56,
        // then 8 words written and 8 verified.
        let mut block = VecMemory::new(64);
        let outcome = AddressLineTest::new().run(&mut block).unwrap();
        assert_eq!(outcome.errors, 0);
        assert_eq!(outcome.operations, 6 * 2 + 3 * 2 + 8 + 8);
    }

    #[test]
    fn test_adjacency_leaves_own_address() {
        let mut block = VecMemory::new(4096);
        AddressLineTest::new().run(&mut block).unwrap();
        assert_eq!(block.read_u64(0x100).unwrap(), 0x100);
        assert_eq!(block.read_u64(0xFF8).unwrap(), 0xFF8);
    }

    #[test]
    fn test_shorted_address_lines_detected() {
        // Address bit 5 always follows bit 3.
        let mut block = ShortedAddressLine {
            inner: VecMemory::new(2 * PATTERN_WINDOW),
            stuck: 5,
            stuck_to: 3,
        };
        let outcome = AddressLineTest::new().run(&mut block).unwrap();
        assert!(outcome.errors > 0);
        // Every word with bit 5 clear reads back its bit-5 sibling.
        assert_eq!(outcome.errors, (PATTERN_WINDOW / 8 / 2) as u64);
        assert!(outcome.failing_offsets.contains(&0));
        assert!(outcome.failing_offsets.contains(&8));
        assert!(outcome.failing_offsets.iter().all(|o| o & (1 << 5) == 0));
    }

    #[test]
    fn test_tiny_block() {
        let mut block = VecMemory::new(8);
        let outcome = AddressLineTest::new().run(&mut block).unwrap();
        assert_eq!(outcome.errors, 0);
        assert_eq!(outcome.operations, 2);
    }
}
