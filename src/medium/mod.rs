//! Medium driver contract for block-addressed storage devices.
//!
//! A *medium* is the lowest abstraction level: one kind of device (NOR flash,
//! EEPROM, RAM, a disk file) exposed as a byte-addressed range with a declared
//! write granularity, erase granularity and a property word describing its
//! overwrite and erase semantics. Everything above — [`StorageArea`] and the
//! record store — is written against this trait alone.
//!
//! # Contract
//!
//! - Offsets are in bytes within the logical device range `[0, capacity())`.
//! - `writev` is only ever called with an offset aligned to [`Medium::write_block`]
//!   and a total length that is a multiple of it; callers guarantee this.
//! - `readv` carries no alignment constraint.
//! - `erase` arguments are in erase-block units; media with free overwrite may
//!   implement it as a fill with the erased value or leave the default
//!   [`Error::NotSupported`].
//! - Implementations must not retain the passed buffers beyond the call.
//!
//! [`StorageArea`]: crate::area::StorageArea
//! [`Error::NotSupported`]: crate::error::Error::NotSupported

use crate::error::Error;

use bitflags::bitflags;

/// EEPROM-like media over a borrowed byte slice.
pub mod eeprom;
/// NOR flash emulation with erase counters and fault injection.
pub mod flash;
/// Volatile memory media over a borrowed byte slice.
pub mod ram;

/// Disk media over a file (requires the `std` feature).
#[cfg(feature = "std")]
pub mod disk;

#[cfg(test)]
mod tests;

bitflags! {
    /// Behavioral properties of a medium or storage area.
    ///
    /// If neither overwrite flag is set, a written region must be erased
    /// before it may be written again.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Props: u8 {
        /// Writes and erases are forbidden.
        const READ_ONLY = 1 << 0;
        /// Any pattern may replace any other (RAM, EEPROM, FRAM, disk).
        const FULL_OVERWRITE = 1 << 1;
        /// Bits may only flip from 1 to 0 without an erase (NOR flash).
        const LIMITED_OVERWRITE = 1 << 2;
        /// The erased value is `0x00` rather than `0xFF`.
        const ZERO_ERASE = 1 << 3;
        /// The medium erases implicitly on write; no explicit erase is needed.
        const AUTO_ERASE = 1 << 4;
    }
}

impl Props {
    /// The byte value an erased region reads as.
    pub const fn erased_value(self) -> u8 {
        if self.bits() & Props::ZERO_ERASE.bits() != 0 {
            0x00
        } else {
            0xFF
        }
    }

    /// Whether written bytes may be modified in place, fully or bit-limited.
    pub const fn overwritable(self) -> bool {
        self.bits() & (Props::FULL_OVERWRITE.bits() | Props::LIMITED_OVERWRITE.bits()) != 0
    }

    /// Whether writes require a prior erase of the target region.
    pub const fn erase_before_write(self) -> bool {
        self.bits() & (Props::FULL_OVERWRITE.bits() | Props::AUTO_ERASE.bits()) == 0
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Props {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Props({=u8:b})", self.bits());
    }
}

/// Device control requests understood by [`Medium::ioctl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ioctl {
    /// Request the CPU-mapped base address for execute-in-place access.
    XipAddress,
}

/// Responses to [`Medium::ioctl`] requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlValue {
    /// The CPU-mapped base address of the device range.
    XipAddress(usize),
}

/// A block-addressed storage device.
///
/// Implementations provide the low-level read, write and erase primitives for
/// one kind of device. The crate ships slice-backed implementations for RAM,
/// EEPROM and NOR flash, and a file-backed one behind the `std` feature; a
/// hardware driver only has to satisfy this trait to slot underneath a
/// [`StorageArea`](crate::area::StorageArea).
///
/// # Examples
///
/// ```rust
/// use sastore::medium::{Medium, ram::RamMedium};
///
/// let mut backing = [0xFFu8; 256];
/// let mut medium = RamMedium::new(&mut backing, 4);
///
/// medium.writev(0, &[b"abcd"]).unwrap();
/// let mut buf = [0u8; 4];
/// medium.readv(0, &mut [&mut buf]).unwrap();
/// assert_eq!(&buf, b"abcd");
/// ```
pub trait Medium {
    /// The smallest unit of a physical write, in bytes.
    fn write_block(&self) -> u32;

    /// The smallest unit of a physical erase, in bytes.
    fn erase_block(&self) -> u32;

    /// Total device size in bytes.
    fn capacity(&self) -> u32;

    /// Overwrite and erase semantics of this device.
    fn props(&self) -> Props;

    /// Read into the buffers in order, starting at `offset`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRange`] if the aggregate range escapes the device
    /// - [`Error::Io`] if the hardware transaction fails
    fn readv(&mut self, offset: u32, bufs: &mut [&mut [u8]]) -> Result<(), Error>;

    /// Write the slices in order, starting at `offset`.
    ///
    /// The caller guarantees `offset` and the aggregate length are multiples
    /// of [`Medium::write_block`].
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRange`] if the aggregate range escapes the device
    /// - [`Error::ReadOnly`] if the device forbids writes
    /// - [`Error::Io`] if the hardware transaction fails
    fn writev(&mut self, offset: u32, data: &[&[u8]]) -> Result<(), Error>;

    /// Erase `count` erase blocks starting at block index `block`.
    ///
    /// Only meaningful for media that require an explicit erase; the default
    /// implementation reports [`Error::NotSupported`].
    fn erase(&mut self, block: u32, count: u32) -> Result<(), Error> {
        let _ = (block, count);
        Err(Error::NotSupported)
    }

    /// Issue a device control request.
    ///
    /// The default implementation reports [`Error::NotSupported`] for every
    /// request.
    fn ioctl(&mut self, cmd: Ioctl) -> Result<IoctlValue, Error> {
        let _ = cmd;
        Err(Error::NotSupported)
    }
}

impl<M: Medium + ?Sized> Medium for &mut M {
    fn write_block(&self) -> u32 {
        M::write_block(self)
    }

    fn erase_block(&self) -> u32 {
        M::erase_block(self)
    }

    fn capacity(&self) -> u32 {
        M::capacity(self)
    }

    fn props(&self) -> Props {
        M::props(self)
    }

    fn readv(&mut self, offset: u32, bufs: &mut [&mut [u8]]) -> Result<(), Error> {
        M::readv(self, offset, bufs)
    }

    fn writev(&mut self, offset: u32, data: &[&[u8]]) -> Result<(), Error> {
        M::writev(self, offset, data)
    }

    fn erase(&mut self, block: u32, count: u32) -> Result<(), Error> {
        M::erase(self, block, count)
    }

    fn ioctl(&mut self, cmd: Ioctl) -> Result<IoctlValue, Error> {
        M::ioctl(self, cmd)
    }
}

/// Return whether `[offset, offset + len)` stays within `capacity` bytes.
pub(crate) fn check_range(capacity: u32, offset: u32, len: u32) -> Result<(), Error> {
    let end = offset.checked_add(len).ok_or(Error::InvalidRange)?;
    if end > capacity {
        return Err(Error::InvalidRange);
    }
    Ok(())
}

/// Aggregate length of a write vector, guarding against overflow.
pub(crate) fn iov_len(data: &[&[u8]]) -> Result<u32, Error> {
    let mut total: u32 = 0;
    for part in data {
        let len = u32::try_from(part.len()).map_err(|_| Error::InvalidRange)?;
        total = total.checked_add(len).ok_or(Error::InvalidRange)?;
    }
    Ok(total)
}

/// Aggregate length of a read vector, guarding against overflow.
pub(crate) fn iov_len_mut(bufs: &[&mut [u8]]) -> Result<u32, Error> {
    let mut total: u32 = 0;
    for buf in bufs.iter() {
        let len = u32::try_from(buf.len()).map_err(|_| Error::InvalidRange)?;
        total = total.checked_add(len).ok_or(Error::InvalidRange)?;
    }
    Ok(total)
}
