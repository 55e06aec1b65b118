//! Disk medium over a file.

use super::{Medium, Props, check_range, iov_len, iov_len_mut};
use crate::error::Error;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Default write granularity. File I/O carries no physical write
/// constraint, so a modest default keeps area staging buffers small.
pub const DEFAULT_WRITE_BLOCK: u32 = 64;
/// Default erase granularity.
pub const DEFAULT_ERASE_BLOCK: u32 = 4096;

/// A disk-backed medium over a [`File`].
///
/// Disks overwrite freely; erase is emulated by filling with `0xFF` so stores
/// can be wiped the same way as on flash. Available with the `std` feature.
#[derive(Debug)]
pub struct FileMedium {
    file: File,
    capacity: u32,
    write_block: u32,
    erase_block: u32,
}

impl FileMedium {
    /// Wrap an existing file of at least `capacity` bytes.
    pub fn new(file: File, capacity: u32) -> Self {
        Self::with_geometry(file, capacity, DEFAULT_WRITE_BLOCK, DEFAULT_ERASE_BLOCK)
    }

    /// Wrap an existing file with explicit write and erase granularity.
    ///
    /// # Panics
    ///
    /// Panics if the geometry is inconsistent.
    pub fn with_geometry(file: File, capacity: u32, write_block: u32, erase_block: u32) -> Self {
        assert!(write_block.is_power_of_two(), "write block must be a power of two");
        assert!(
            erase_block >= write_block && erase_block % write_block == 0,
            "erase block must be a multiple of the write block"
        );
        assert!(capacity % erase_block == 0, "capacity must be a multiple of the erase block");
        Self {
            file,
            capacity,
            write_block,
            erase_block,
        }
    }

    /// Create (or truncate) a file of `capacity` bytes, filled with `0xFF`.
    pub fn create<P: AsRef<Path>>(path: P, capacity: u32) -> std::io::Result<Self> {
        let mut file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let fill = [0xFFu8; 4096];
        let mut remaining = capacity as usize;
        while remaining > 0 {
            let n = remaining.min(fill.len());
            file.write_all(&fill[..n])?;
            remaining -= n;
        }
        file.flush()?;
        Ok(Self::new(file, capacity))
    }
}

impl Medium for FileMedium {
    fn write_block(&self) -> u32 {
        self.write_block
    }

    fn erase_block(&self) -> u32 {
        self.erase_block
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn props(&self) -> Props {
        Props::FULL_OVERWRITE
    }

    fn readv(&mut self, offset: u32, bufs: &mut [&mut [u8]]) -> Result<(), Error> {
        check_range(self.capacity, offset, iov_len_mut(bufs)?)?;
        self.file
            .seek(SeekFrom::Start(offset as u64))
            .map_err(|_| Error::Io)?;
        for buf in bufs.iter_mut() {
            self.file.read_exact(buf).map_err(|_| Error::Io)?;
        }
        Ok(())
    }

    fn writev(&mut self, offset: u32, data: &[&[u8]]) -> Result<(), Error> {
        check_range(self.capacity, offset, iov_len(data)?)?;
        self.file
            .seek(SeekFrom::Start(offset as u64))
            .map_err(|_| Error::Io)?;
        for part in data {
            self.file.write_all(part).map_err(|_| Error::Io)?;
        }
        self.file.flush().map_err(|_| Error::Io)
    }

    fn erase(&mut self, block: u32, count: u32) -> Result<(), Error> {
        let from = block.checked_mul(self.erase_block).ok_or(Error::InvalidRange)?;
        let len = count.checked_mul(self.erase_block).ok_or(Error::InvalidRange)?;
        check_range(self.capacity, from, len)?;
        self.file
            .seek(SeekFrom::Start(from as u64))
            .map_err(|_| Error::Io)?;
        let fill = [0xFFu8; 4096];
        let mut remaining = len as usize;
        while remaining > 0 {
            let n = remaining.min(fill.len());
            self.file.write_all(&fill[..n]).map_err(|_| Error::Io)?;
            remaining -= n;
        }
        self.file.flush().map_err(|_| Error::Io)
    }
}
