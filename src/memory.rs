// ================================================================================================
// Scratch memory for the test phases
// ================================================================================================
//
// Every test algorithm talks to memory through `MemoryAccess`: bounds-checked byte, u32 and u64
// reads/writes at byte offsets. `MemoryBlock` is the real thing (page-aligned heap allocation,
// volatile accesses so the compiler cannot fold a write-then-read into a constant). Unit tests
// wrap blocks to inject faults.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr;

use crate::error::MemoryError;

pub const MIB: usize = 1024 * 1024;

/// Returns `Ok(())` when `[offset, offset + len)` fits in a block of `size` bytes.
pub fn check_range(offset: usize, len: usize, size: usize) -> Result<(), MemoryError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(MemoryError::OutOfBounds { offset, len, size }),
    }
}

/// Bounds-checked access to a fixed-length byte buffer.
///
/// Multi-byte values are little-endian. Implementors only have to provide
/// [`read_bytes`](Self::read_bytes) and [`write_bytes`](Self::write_bytes); the
/// typed accessors are built on top and may be overridden for speed.
pub trait MemoryAccess {
    /// Size of the buffer in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Result<(), MemoryError>;

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<(), MemoryError>;

    fn read_u8(&self, offset: usize) -> Result<u8, MemoryError> {
        let mut b = [0u8; 1];
        self.read_bytes(offset, &mut b)?;
        Ok(b[0])
    }

    fn write_u8(&mut self, offset: usize, value: u8) -> Result<(), MemoryError> {
        self.write_bytes(offset, &[value])
    }

    fn read_u32(&self, offset: usize) -> Result<u32, MemoryError> {
        let mut b = [0u8; 4];
        self.read_bytes(offset, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn write_u32(&mut self, offset: usize, value: u32) -> Result<(), MemoryError> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    fn read_u64(&self, offset: usize) -> Result<u64, MemoryError> {
        let mut b = [0u8; 8];
        self.read_bytes(offset, &mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    fn write_u64(&mut self, offset: usize, value: u64) -> Result<(), MemoryError> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    /// Sets `len` bytes starting at `offset` to `value`.
    fn fill(&mut self, offset: usize, len: usize, value: u8) -> Result<(), MemoryError> {
        check_range(offset, len, self.len())?;
        let chunk = [value; 4096];
        let mut done = 0;
        while done < len {
            let n = (len - done).min(chunk.len());
            self.write_bytes(offset + done, &chunk[..n])?;
            done += n;
        }
        Ok(())
    }
}

/// Hands out one fresh block per test phase.
pub trait BlockProvider {
    type Block: MemoryAccess;

    /// Allocates a zero-filled block of exactly `size` bytes.
    fn allocate(&mut self, size: usize) -> Result<Self::Block, MemoryError>;
}

/// Allocates real heap memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

impl BlockProvider for SystemMemory {
    type Block = MemoryBlock;

    fn allocate(&mut self, size: usize) -> Result<MemoryBlock, MemoryError> {
        MemoryBlock::new(size)
    }
}

fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

/// A page-aligned, zero-initialized block of memory owned by a single test phase.
/// The memory is released when the block is dropped.
#[derive(Debug)]
pub struct MemoryBlock {
    ptr: *mut u8,
    layout: Layout,
}

impl MemoryBlock {
    /// Allocates `size` bytes aligned to the system page size.
    ///
    /// `size` must be a non-zero multiple of 8 so the block splits into whole
    /// 64-bit words.
    pub fn new(size: usize) -> Result<Self, MemoryError> {
        if size == 0 || size % 8 != 0 {
            return Err(MemoryError::InvalidSize(size));
        }

        let layout =
            Layout::from_size_align(size, page_size()).map_err(|_| MemoryError::Allocation(size))?;

        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(MemoryError::Allocation(size));
        }

        Ok(Self { ptr, layout })
    }
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

impl MemoryAccess for MemoryBlock {
    fn len(&self) -> usize {
        self.layout.size()
    }

    fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Result<(), MemoryError> {
        check_range(offset, buf.len(), self.len())?;
        for (i, b) in buf.iter_mut().enumerate() {
            *b = unsafe { ptr::read_volatile(self.ptr.add(offset + i)) };
        }
        Ok(())
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<(), MemoryError> {
        check_range(offset, data.len(), self.len())?;
        for (i, &b) in data.iter().enumerate() {
            unsafe { ptr::write_volatile(self.ptr.add(offset + i), b) };
        }
        Ok(())
    }

    fn read_u8(&self, offset: usize) -> Result<u8, MemoryError> {
        check_range(offset, 1, self.len())?;
        Ok(unsafe { ptr::read_volatile(self.ptr.add(offset)) })
    }

    fn write_u8(&mut self, offset: usize, value: u8) -> Result<(), MemoryError> {
        check_range(offset, 1, self.len())?;
        unsafe { ptr::write_volatile(self.ptr.add(offset), value) };
        Ok(())
    }

    fn read_u32(&self, offset: usize) -> Result<u32, MemoryError> {
        check_range(offset, 4, self.len())?;
        if offset % 4 != 0 {
            let mut b = [0u8; 4];
            self.read_bytes(offset, &mut b)?;
            return Ok(u32::from_le_bytes(b));
        }
        // The base is page aligned, so an aligned offset gives an aligned pointer.
        let raw = unsafe { ptr::read_volatile(self.ptr.add(offset) as *const u32) };
        Ok(u32::from_le(raw))
    }

    fn write_u32(&mut self, offset: usize, value: u32) -> Result<(), MemoryError> {
        check_range(offset, 4, self.len())?;
        if offset % 4 != 0 {
            return self.write_bytes(offset, &value.to_le_bytes());
        }
        unsafe { ptr::write_volatile(self.ptr.add(offset) as *mut u32, value.to_le()) };
        Ok(())
    }

    fn read_u64(&self, offset: usize) -> Result<u64, MemoryError> {
        check_range(offset, 8, self.len())?;
        if offset % 8 != 0 {
            let mut b = [0u8; 8];
            self.read_bytes(offset, &mut b)?;
            return Ok(u64::from_le_bytes(b));
        }
        let raw = unsafe { ptr::read_volatile(self.ptr.add(offset) as *const u64) };
        Ok(u64::from_le(raw))
    }

    fn write_u64(&mut self, offset: usize, value: u64) -> Result<(), MemoryError> {
        check_range(offset, 8, self.len())?;
        if offset % 8 != 0 {
            return self.write_bytes(offset, &value.to_le_bytes());
        }
        unsafe { ptr::write_volatile(self.ptr.add(offset) as *mut u64, value.to_le()) };
        Ok(())
    }

    fn fill(&mut self, offset: usize, len: usize, value: u8) -> Result<(), MemoryError> {
        check_range(offset, len, self.len())?;
        for i in 0..len {
            unsafe { ptr::write_volatile(self.ptr.add(offset + i), value) };
        }
        Ok(())
    }
}
