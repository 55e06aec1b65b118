//! Volatile memory medium over a borrowed byte slice.

use super::{Medium, Props, check_range, iov_len, iov_len_mut};
use crate::error::Error;

/// A RAM-backed medium with free overwrite.
///
/// The backing slice is borrowed so the same memory can be a `static` buffer,
/// a stack array in a test, or a shared region handed over from another
/// application. Erase is implemented as a fill with `0xFF` even though the
/// medium does not require erase-before-write; this keeps wipe semantics
/// uniform across media.
///
/// # Examples
///
/// ```rust
/// use sastore::medium::{Medium, ram::RamMedium};
///
/// let mut backing = [0u8; 1024];
/// let mut ram = RamMedium::new(&mut backing, 8);
/// assert_eq!(ram.capacity(), 1024);
/// ram.writev(16, &[b"record d", b"ata here"]).unwrap();
/// ```
#[derive(Debug)]
pub struct RamMedium<'a> {
    mem: &'a mut [u8],
    write_block: u32,
}

impl<'a> RamMedium<'a> {
    /// Create a RAM medium over `mem` with the given write granularity.
    ///
    /// # Panics
    ///
    /// Panics if `write_block` is not a power of two or does not divide the
    /// backing length.
    pub fn new(mem: &'a mut [u8], write_block: u32) -> Self {
        assert!(write_block.is_power_of_two(), "write block must be a power of two");
        assert!(
            mem.len() % write_block as usize == 0,
            "backing length must be a multiple of the write block"
        );
        Self { mem, write_block }
    }

    /// Direct read-only view of the backing memory.
    pub fn as_slice(&self) -> &[u8] {
        self.mem
    }
}

impl Medium for RamMedium<'_> {
    fn write_block(&self) -> u32 {
        self.write_block
    }

    fn erase_block(&self) -> u32 {
        self.write_block
    }

    fn capacity(&self) -> u32 {
        self.mem.len() as u32
    }

    fn props(&self) -> Props {
        Props::FULL_OVERWRITE
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
        check_range(self.capacity(), offset, iov_len(data)?)?;
        let mut at = offset as usize;
        for part in data {
            self.mem[at..at + part.len()].copy_from_slice(part);
            at += part.len();
        }
        Ok(())
    }

    fn erase(&mut self, block: u32, count: u32) -> Result<(), Error> {
        let bs = self.write_block as usize;
        let from = block as usize * bs;
        let to = from + count as usize * bs;
        if to > self.mem.len() || from > to {
            return Err(Error::InvalidRange);
        }
        self.mem[from..to].fill(0xFF);
        Ok(())
    }
}
