//! Byte-addressed storage areas over a medium.
//!
//! A [`StorageArea`] presents a uniform byte-addressed view of a
//! [`Medium`]: it validates ranges, performs gather writes that always reach
//! the medium as aligned, whole-multiple transfers of the declared write
//! block, addresses erases in erase-block units, and passes device control
//! requests through. The record store is built entirely on this contract, so
//! the same log code runs over NOR flash, EEPROM, RAM and disk.
//!
//! # Write alignment
//!
//! The declared `write_size` is the unit the area promises the medium: every
//! transfer it emits is aligned to it and a multiple of it, regardless of how
//! the caller's buffers are sliced. An [`AreaWriter`] carries a small staging
//! buffer across buffer boundaries to keep that promise.

use crate::error::Error;
use crate::medium::{Ioctl, IoctlValue, Medium, Props, check_range, iov_len, iov_len_mut};

use heapless::Vec;


/// Upper bound on the declared write block, sizing the staging buffer.
pub const MAX_WRITE_BLOCK: usize = 256;

/// Immutable geometry and properties of a storage area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaLayout {
    /// Write granularity in bytes; a power of two.
    pub write_size: u32,
    /// Erase granularity in bytes; a multiple of `write_size`.
    pub erase_size: u32,
    /// Number of erase blocks; total size is `erase_size * erase_blocks`.
    pub erase_blocks: u32,
    /// Overwrite and erase semantics of the area.
    pub props: Props,
}

impl AreaLayout {
    /// Total area size in bytes.
    pub const fn capacity(&self) -> u32 {
        self.erase_size * self.erase_blocks
    }
}

/// A byte-addressed view of a medium with declared write and erase geometry.
///
/// The area is created once from its layout descriptor and is immutable; it
/// owns (or mutably borrows, via the blanket `Medium` impl for `&mut M`) the
/// medium underneath it.
#[derive(Debug)]
pub struct StorageArea<M: Medium> {
    medium: M,
    layout: AreaLayout,
}

impl<M: Medium> StorageArea<M> {
    /// Create an area, validating the declared layout.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] if `write_size` is not a power of two up to
    /// [`MAX_WRITE_BLOCK`], `erase_size` is not a nonzero multiple of it,
    /// there are no erase blocks, or the total size overflows.
    pub fn new(medium: M, layout: AreaLayout) -> Result<Self, Error> {
        if !layout.write_size.is_power_of_two() || layout.write_size as usize > MAX_WRITE_BLOCK {
            return Err(Error::InvalidConfig);
        }
        if layout.erase_size == 0 || layout.erase_size % layout.write_size != 0 {
            return Err(Error::InvalidConfig);
        }
        if layout.erase_blocks == 0
            || layout.erase_size.checked_mul(layout.erase_blocks).is_none()
        {
            return Err(Error::InvalidConfig);
        }
        Ok(Self { medium, layout })
    }

    /// Create an area and cross-check the declaration against the driver.
    ///
    /// In addition to the [`StorageArea::new`] checks this validates that the
    /// physical write block divides the declared `write_size`, the declared
    /// `erase_size` is a multiple of the physical erase block, the declared
    /// range fits the device, the declared erased value matches, and the
    /// declared overwrite capabilities are not stronger than the device's.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] on any mismatch.
    pub fn verified(medium: M, layout: AreaLayout) -> Result<Self, Error> {
        let area = Self::new(medium, layout)?;
        let m = &area.medium;
        let dev = m.props();
        let ok = layout.write_size % m.write_block() == 0
            && layout.erase_size % m.erase_block() == 0
            && layout.capacity() <= m.capacity()
            && layout.props.erased_value() == dev.erased_value()
            && (!layout.props.contains(Props::FULL_OVERWRITE)
                || dev.contains(Props::FULL_OVERWRITE))
            && (!layout.props.contains(Props::LIMITED_OVERWRITE) || dev.overwritable())
            && (!layout.props.contains(Props::AUTO_ERASE)
                || dev.intersects(Props::AUTO_ERASE | Props::FULL_OVERWRITE));
        if !ok {
            return Err(Error::InvalidConfig);
        }
        Ok(area)
    }

    /// Declared write granularity in bytes.
    pub fn write_size(&self) -> u32 {
        self.layout.write_size
    }

    /// Declared erase granularity in bytes.
    pub fn erase_size(&self) -> u32 {
        self.layout.erase_size
    }

    /// Number of declared erase blocks.
    pub fn erase_blocks(&self) -> u32 {
        self.layout.erase_blocks
    }

    /// Total area size in bytes.
    pub fn capacity(&self) -> u32 {
        self.layout.capacity()
    }

    /// Area properties.
    pub fn props(&self) -> Props {
        self.layout.props
    }

    /// Access the medium underneath the area.
    pub fn medium_mut(&mut self) -> &mut M {
        &mut self.medium
    }

    /// Read `buf.len()` bytes starting at `offset`.
    pub fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Error> {
        self.readv(offset, &mut [buf])
    }

    /// Scatter-read into the buffers in order, starting at `offset`.
    ///
    /// Reads carry no alignment constraint and are forwarded to the medium
    /// per call.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRange`] if the aggregate range escapes the area.
    pub fn readv(&mut self, offset: u32, bufs: &mut [&mut [u8]]) -> Result<(), Error> {
        check_range(self.layout.capacity(), offset, iov_len_mut(bufs)?)?;
        self.medium.readv(offset, bufs)
    }

    /// Write `data` at `offset`; length must be a multiple of the write size.
    pub fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), Error> {
        self.writev(offset, &[data])
    }

    /// Gather-write the slices in order, starting at `offset`.
    ///
    /// The aggregate length must be a multiple of the declared write size;
    /// individual slices may be any length, the engine restores alignment
    /// across their boundaries.
    ///
    /// # Errors
    ///
    /// - [`Error::ReadOnly`] if the area forbids writes
    /// - [`Error::InvalidArgument`] if offset or total length is misaligned
    /// - [`Error::InvalidRange`] if the aggregate range escapes the area
    /// - [`Error::Io`] if a medium transaction fails; the destination offset
    ///   has already advanced past the transfers that succeeded
    pub fn writev(&mut self, offset: u32, data: &[&[u8]]) -> Result<(), Error> {
        // Reject a misaligned total before anything reaches the medium; the
        // streaming writer can only detect it at finish time.
        if iov_len(data)? % self.layout.write_size != 0 {
            return Err(Error::InvalidArgument);
        }
        let mut writer = self.writer(offset)?;
        for part in data {
            writer.push(part)?;
        }
        writer.finish().map(|_| ())
    }

    /// Start a streaming gather write at `offset`.
    pub fn writer(&mut self, offset: u32) -> Result<AreaWriter<'_, M>, Error> {
        self.writer_inner(offset, false)
    }

    /// Start a streaming gather write that erases each erase block as the
    /// stream enters its base offset.
    ///
    /// On media with free overwrite or implicit erase this behaves exactly
    /// like [`StorageArea::writer`].
    pub fn writer_erasing(&mut self, offset: u32) -> Result<AreaWriter<'_, M>, Error> {
        let erase = self.layout.props.erase_before_write();
        self.writer_inner(offset, erase)
    }

    fn writer_inner(&mut self, offset: u32, erase_on_entry: bool) -> Result<AreaWriter<'_, M>, Error> {
        if self.layout.props.contains(Props::READ_ONLY) {
            return Err(Error::ReadOnly);
        }
        if offset % self.layout.write_size != 0 {
            return Err(Error::InvalidArgument);
        }
        if offset > self.layout.capacity() {
            return Err(Error::InvalidRange);
        }
        Ok(AreaWriter {
            area: self,
            offset,
            staged: Vec::new(),
            erase_on_entry,
        })
    }

    /// Erase `count` erase blocks starting at block index `block`.
    ///
    /// # Errors
    ///
    /// - [`Error::ReadOnly`] if the area forbids erases
    /// - [`Error::InvalidRange`] if the block range escapes the area
    /// - [`Error::NotSupported`] if the medium has no erase primitive
    pub fn erase(&mut self, block: u32, count: u32) -> Result<(), Error> {
        if self.layout.props.contains(Props::READ_ONLY) {
            return Err(Error::ReadOnly);
        }
        let end = block.checked_add(count).ok_or(Error::InvalidRange)?;
        if end > self.layout.erase_blocks {
            return Err(Error::InvalidRange);
        }
        let offset = block * self.layout.erase_size;
        let len = count * self.layout.erase_size;
        // Translate declared blocks into the medium's erase units.
        let unit = self.medium.erase_block();
        if unit == 0 || offset % unit != 0 || len % unit != 0 {
            return Err(Error::InvalidConfig);
        }
        self.medium.erase(offset / unit, len / unit)
    }

    /// Fill `[offset, offset + len)` with `value`.
    ///
    /// Offset and length must be write-size aligned. Used for sector fills
    /// and for wiping media that overwrite freely but have no erase.
    pub fn fill(&mut self, offset: u32, len: u32, value: u8) -> Result<(), Error> {
        if offset % self.layout.write_size != 0 || len % self.layout.write_size != 0 {
            return Err(Error::InvalidArgument);
        }
        check_range(self.layout.capacity(), offset, len)?;
        let pattern = [value; MAX_WRITE_BLOCK];
        let mut at = offset;
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(pattern.len() as u32);
            self.medium.writev(at, &[&pattern[..n as usize]])?;
            at += n;
            remaining -= n;
        }
        Ok(())
    }

    /// Issue a device control request against the medium.
    pub fn ioctl(&mut self, cmd: Ioctl) -> Result<IoctlValue, Error> {
        self.medium.ioctl(cmd)
    }

    /// Write an aligned chunk, splitting at erase boundaries when the writer
    /// erases on entry. `offset` is advanced past every transfer that
    /// succeeded, so a failure leaves a usable partial-write position.
    fn write_chunk(
        &mut self,
        offset: &mut u32,
        erase_on_entry: bool,
        data: &[u8],
    ) -> Result<(), Error> {
        let mut data = data;
        while !data.is_empty() {
            let mut len = data.len() as u32;
            if erase_on_entry {
                let e = self.layout.erase_size;
                if *offset % e == 0 {
                    self.erase(*offset / e, 1)?;
                }
                len = len.min(e - *offset % e);
            }
            self.medium.writev(*offset, &[&data[..len as usize]])?;
            *offset += len;
            data = &data[len as usize..];
        }
        Ok(())
    }
}

/// A streaming gather write against a [`StorageArea`].
///
/// Bytes pushed through the writer reach the medium as write-size aligned,
/// whole-multiple transfers; a partial trailing block is staged until the
/// next push completes it. [`AreaWriter::finish`] fails if the stream did not
/// end on a write-size boundary.
#[derive(Debug)]
pub struct AreaWriter<'a, M: Medium> {
    area: &'a mut StorageArea<M>,
    offset: u32,
    staged: Vec<u8, MAX_WRITE_BLOCK>,
    erase_on_entry: bool,
}

impl<M: Medium> AreaWriter<'_, M> {
    /// The logical stream position: staged bytes included.
    pub fn position(&self) -> u32 {
        self.offset + self.staged.len() as u32
    }

    /// Append `data` to the write stream.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRange`] if the stream would escape the area
    /// - [`Error::Io`] if a medium transaction fails
    pub fn push(&mut self, data: &[u8]) -> Result<(), Error> {
        check_range(
            self.area.layout.capacity(),
            self.position(),
            data.len() as u32,
        )?;
        let w = self.area.layout.write_size as usize;
        let mut data = data;

        // Top up a partially staged block first.
        if !self.staged.is_empty() {
            let take = (w - self.staged.len()).min(data.len());
            // Capacity bounded by `w`.
            let _ = self.staged.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.staged.len() == w {
                let block = core::mem::take(&mut self.staged);
                self.area
                    .write_chunk(&mut self.offset, self.erase_on_entry, &block)?;
            }
        }

        // Direct pass-through for the maximal aligned prefix.
        let direct = data.len() - data.len() % w;
        if direct > 0 {
            self.area
                .write_chunk(&mut self.offset, self.erase_on_entry, &data[..direct])?;
            data = &data[direct..];
        }

        // Stage the tail remainder.
        if !data.is_empty() {
            let _ = self.staged.extend_from_slice(data);
        }
        Ok(())
    }

    /// Finish the stream, returning the offset one past the written range.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if the total pushed length was not a
    /// multiple of the write size.
    pub fn finish(self) -> Result<u32, Error> {
        if !self.staged.is_empty() {
            return Err(Error::InvalidArgument);
        }
        Ok(self.offset)
    }
}
