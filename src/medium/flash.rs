//! NOR flash emulation over a borrowed byte slice.

use super::{Ioctl, IoctlValue, Medium, Props, check_range, iov_len, iov_len_mut};
use crate::error::Error;

use heapless::Vec;

/// Maximum number of erase blocks the emulation tracks counters for.
pub const MAX_BLOCKS: usize = 64;

/// A NOR flash medium emulated in memory.
///
/// Programming follows NOR semantics: a write ANDs the new data into the
/// array, so bits only ever flip from 1 to 0 until the containing block is
/// erased back to all 1s. The emulation keeps a per-block erase counter and
/// can inject a single write fault, which is what the bad-write-block and
/// power-loss tests are built on.
///
/// The device answers [`Ioctl::XipAddress`] with the address of its backing
/// slice, standing in for a CPU-mapped flash window.
#[derive(Debug)]
pub struct NorMedium<'a> {
    mem: &'a mut [u8],
    write_block: u32,
    erase_block: u32,
    erase_counts: Vec<u32, MAX_BLOCKS>,
    write_fault: Option<u32>,
}

impl<'a> NorMedium<'a> {
    /// Create a NOR flash emulation with the given geometry.
    ///
    /// The backing slice is used as-is; call [`NorMedium::erase_all`] first
    /// when a blank part is wanted.
    ///
    /// # Panics
    ///
    /// Panics if the geometry is inconsistent (write block not a power of
    /// two, erase block not a multiple of it, backing length not a multiple
    /// of the erase block) or the slice spans more than [`MAX_BLOCKS`] blocks.
    pub fn new(mem: &'a mut [u8], write_block: u32, erase_block: u32) -> Self {
        assert!(write_block.is_power_of_two(), "write block must be a power of two");
        assert!(
            erase_block >= write_block && erase_block % write_block == 0,
            "erase block must be a multiple of the write block"
        );
        assert!(
            mem.len() % erase_block as usize == 0,
            "backing length must be a multiple of the erase block"
        );
        let blocks = mem.len() / erase_block as usize;
        assert!(blocks <= MAX_BLOCKS, "too many erase blocks for the emulation");
        let mut erase_counts = Vec::new();
        for _ in 0..blocks {
            // Capacity checked above.
            let _ = erase_counts.push(0);
        }
        Self {
            mem,
            write_block,
            erase_block,
            erase_counts,
            write_fault: None,
        }
    }

    /// Erase every block, as a factory-blank part would read.
    pub fn erase_all(&mut self) {
        self.mem.fill(0xFF);
        for count in self.erase_counts.iter_mut() {
            *count += 1;
        }
    }

    /// How many times the given erase block has been erased.
    pub fn erase_count(&self, block: u32) -> u32 {
        self.erase_counts.get(block as usize).copied().unwrap_or(0)
    }

    /// Arm a one-shot fault: the next write whose range covers `offset`
    /// fails with [`Error::Io`] and leaves the array untouched.
    pub fn fail_next_write_at(&mut self, offset: u32) {
        self.write_fault = Some(offset);
    }

    /// Direct read-only view of the flash array.
    pub fn as_slice(&self) -> &[u8] {
        self.mem
    }
}

impl Medium for NorMedium<'_> {
    fn write_block(&self) -> u32 {
        self.write_block
    }

    fn erase_block(&self) -> u32 {
        self.erase_block
    }

    fn capacity(&self) -> u32 {
        self.mem.len() as u32
    }

    fn props(&self) -> Props {
        Props::LIMITED_OVERWRITE
    }

    fn readv(&mut self, offset: u32, bufs: &mut [&mut [u8]]) -> Result<(), Error> {
        check_range(self.capacity(), offset, iov_len_mut(bufs)?)?;
        let mut at = offset as usize;
        for buf in bufs.iter_mut() {
            buf.copy_from_slice(&self.mem[at..at + buf.len()]);
            at += buf.len();
        }
        Ok(())
    }

    fn writev(&mut self, offset: u32, data: &[&[u8]]) -> Result<(), Error> {
        let total = iov_len(data)?;
        check_range(self.capacity(), offset, total)?;
        if let Some(fault) = self.write_fault {
            if fault >= offset && fault < offset + total {
                self.write_fault = None;
                return Err(Error::Io);
            }
        }
        let mut at = offset as usize;
        for part in data {
            for (dst, src) in self.mem[at..at + part.len()].iter_mut().zip(*part) {
                *dst &= *src;
            }
            at += part.len();
        }
        Ok(())
    }

    fn erase(&mut self, block: u32, count: u32) -> Result<(), Error> {
        let bs = self.erase_block as usize;
        let from = block as usize * bs;
        let to = from + count as usize * bs;
        if to > self.mem.len() || from > to {
            return Err(Error::InvalidRange);
        }
        self.mem[from..to].fill(0xFF);
        for b in block..block + count {
            if let Some(n) = self.erase_counts.get_mut(b as usize) {
                *n += 1;
            }
        }
        Ok(())
    }

    fn ioctl(&mut self, cmd: Ioctl) -> Result<IoctlValue, Error> {
        match cmd {
            Ioctl::XipAddress => Ok(IoctlValue::XipAddress(self.mem.as_ptr() as usize)),
        }
    }
}
