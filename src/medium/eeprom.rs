//! EEPROM-like medium over a borrowed byte slice.

use super::{Medium, Props, check_range, iov_len, iov_len_mut};
use crate::error::Error;

/// An EEPROM-backed medium: byte-granular writes, free overwrite, page-sized
/// erase blocks.
///
/// Some EEPROM parts (and most FRAM) read `0x00` after erase instead of the
/// flash-conventional `0xFF`; construct with [`EepromMedium::new_zero_erase`]
/// to model those.
#[derive(Debug)]
pub struct EepromMedium<'a> {
    mem: &'a mut [u8],
    page_size: u32,
    props: Props,
}

impl<'a> EepromMedium<'a> {
    /// Create an EEPROM medium with `0xFF` erase semantics.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is zero or does not divide the backing length.
    pub fn new(mem: &'a mut [u8], page_size: u32) -> Self {
        Self::with_props(mem, page_size, Props::FULL_OVERWRITE)
    }

    /// Create an EEPROM medium whose erased bytes read as `0x00`.
    pub fn new_zero_erase(mem: &'a mut [u8], page_size: u32) -> Self {
        Self::with_props(mem, page_size, Props::FULL_OVERWRITE | Props::ZERO_ERASE)
    }

    fn with_props(mem: &'a mut [u8], page_size: u32, props: Props) -> Self {
        assert!(page_size > 0, "page size must be nonzero");
        assert!(
            mem.len() % page_size as usize == 0,
            "backing length must be a multiple of the page size"
        );
        Self { mem, page_size, props }
    }
}

impl Medium for EepromMedium<'_> {
    fn write_block(&self) -> u32 {
        1
    }

    fn erase_block(&self) -> u32 {
        self.page_size
    }

    fn capacity(&self) -> u32 {
        self.mem.len() as u32
    }

    fn props(&self) -> Props {
        self.props
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
        let page = self.page_size as usize;
        let from = block as usize * page;
        let to = from + count as usize * page;
        if to > self.mem.len() || from > to {
            return Err(Error::InvalidRange);
        }
        self.mem[from..to].fill(self.props.erased_value());
        Ok(())
    }
}
