//! Persistent, crash-tolerant append-only record stores.
//!
//! A [`Store`] partitions a [`StorageArea`] into fixed-size sectors and
//! appends CRC-protected records to them. Three behavioral modes are
//! supported:
//!
//! - **Read-only** ([`Store::read_only`]): mounts and iterates an existing
//!   log, refuses every mutation.
//! - **Circular** ([`Store::circular`]): a simple circular buffer; when the
//!   log is full the caller advances to the next sector, overwriting the
//!   oldest data.
//! - **Persistent** ([`Store::persistent`]): a circular buffer that compacts
//!   on advance, asking a user-supplied [`CompactionPolicy`] which records
//!   are still live and carrying those forward before their sectors are
//!   erased.
//!
//! Every record is stamped with the store's 8-bit wrap counter, which
//! increments each time the write head wraps past sector zero; mounting scans
//! the sectors for the wrap boundary to recover the head position after power
//! loss.
//!
//! # Examples
//!
//! ```rust
//! use sastore::area::{AreaLayout, StorageArea};
//! use sastore::medium::{Props, ram::RamMedium};
//! use sastore::store::{Store, StoreConfig};
//!
//! let mut backing = [0xFFu8; 4096];
//! let area = StorageArea::new(
//!     RamMedium::new(&mut backing, 8),
//!     AreaLayout {
//!         write_size: 8,
//!         erase_size: 1024,
//!         erase_blocks: 4,
//!         props: Props::FULL_OVERWRITE,
//!     },
//! )?;
//! let mut store = Store::circular(
//!     area,
//!     StoreConfig {
//!         sector_size: 1024,
//!         sector_count: 4,
//!         spare_sectors: 0,
//!         crc_skip: 0,
//!         cookie: &[],
//!     },
//! );
//! store.mount()?;
//!
//! let rec = store.append(&[b"hello"])?;
//! let mut buf = [0u8; 5];
//! store.read_record(&rec, 0, &mut buf)?;
//! assert_eq!(&buf, b"hello");
//! # Ok::<(), sastore::Error>(())
//! ```

use crate::area::{MAX_WRITE_BLOCK, StorageArea};
use crate::error::Error;
use crate::medium::{Medium, Props};

mod record;


pub use record::{MAX_RECORD_LEN, RecordHandle, RecordView};

use record::{HEADER_LEN, Header, MAGIC, SLOT_OVERHEAD, TRAILER_LEN, align_up};

/// Decides which records survive a compaction.
///
/// The persistent mode calls [`CompactionPolicy::keep`] for every valid
/// record in a sector that is about to be reclaimed; records it answers
/// `true` for are re-framed with the current wrap counter and appended at
/// the write head. After each successful move
/// [`CompactionPolicy::relocated`] is invoked so external indices can be
/// repointed.
pub trait CompactionPolicy<M: Medium> {
    /// Whether `record` is still live and must be carried forward.
    fn keep(&mut self, record: &mut RecordView<'_, M>) -> bool;

    /// A record was moved from `from` to `to` during compaction.
    fn relocated(&mut self, from: &RecordHandle, to: &RecordHandle) {
        let _ = (from, to);
    }

    /// Whether this policy rescues records at all.
    ///
    /// A persistent store with an active policy needs enough spare sectors
    /// to rescue a whole erase block; a store whose policy never keeps
    /// anything ([`NoCompaction`]) is exempt from that sizing rule.
    fn compacts(&self) -> bool {
        true
    }
}

/// The unit policy for modes without compaction.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCompaction;

impl<M: Medium> CompactionPolicy<M> for NoCompaction {
    fn keep(&mut self, _record: &mut RecordView<'_, M>) -> bool {
        false
    }

    fn compacts(&self) -> bool {
        false
    }
}

/// Behavioral mode of a store.
#[derive(Debug)]
pub enum Mode<P> {
    /// Mount and iterate only; every mutation fails.
    ReadOnly,
    /// Simple circular buffer: overwrite-on-full via [`Store::advance`].
    Circular,
    /// Persistent circular buffer: compact-on-full via the policy.
    Persistent(P),
}

/// Configuration of a store over its area.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig<'a> {
    /// Sector size in bytes; a multiple of the area write size and a divisor
    /// or multiple of the erase size.
    pub sector_size: u32,
    /// Number of sectors; `sector_count * sector_size` must fit the area.
    pub sector_count: u16,
    /// Sectors kept free ahead of the write head. Persistent mode requires
    /// `spare_sectors * sector_size >= erase_size`.
    pub spare_sectors: u16,
    /// Bytes at the start of each record's data excluded from the CRC, so
    /// they may later be overwritten in place to invalidate the record.
    pub crc_skip: u16,
    /// Opaque blob written at the start of each new sector; empty for none.
    pub cookie: &'a [u8],
}

#[derive(Debug, Clone, Copy)]
struct State {
    sector: u16,
    loc: u32,
    wrap: u8,
    ready: bool,
}

/// Engine state shared by every mode: the area, the configuration and the
/// sector state machine.
#[derive(Debug)]
struct Core<'a, M: Medium> {
    area: StorageArea<M>,
    cfg: StoreConfig<'a>,
    state: State,
}

/// A log-structured record store over a [`StorageArea`].
///
/// Created unmounted with [`Store::read_only`], [`Store::circular`] or
/// [`Store::persistent`]; [`Store::mount`] scans the medium and recovers the
/// write head. All mutating operations take `&mut self`, which is the
/// single-owner exclusion the log requires; see [`crate::gate`] for sharing
/// a store from `static` storage.
#[derive(Debug)]
pub struct Store<'a, M: Medium, P = NoCompaction> {
    core: Core<'a, M>,
    mode: Mode<P>,
}

impl<'a, M: Medium> Store<'a, M, NoCompaction> {
    /// Create an unmounted read-only store.
    pub fn read_only(area: StorageArea<M>, cfg: StoreConfig<'a>) -> Self {
        Self::with_mode(area, cfg, Mode::ReadOnly)
    }

    /// Create an unmounted simple circular buffer store.
    pub fn circular(area: StorageArea<M>, cfg: StoreConfig<'a>) -> Self {
        Self::with_mode(area, cfg, Mode::Circular)
    }
}

impl<'a, M: Medium, P: CompactionPolicy<M>> Store<'a, M, P> {
    /// Create an unmounted persistent circular buffer store with `policy`
    /// deciding record liveness during compaction.
    pub fn persistent(area: StorageArea<M>, cfg: StoreConfig<'a>, policy: P) -> Self {
        Self::with_mode(area, cfg, Mode::Persistent(policy))
    }

    /// Create an unmounted store with an explicit mode.
    pub fn with_mode(area: StorageArea<M>, cfg: StoreConfig<'a>, mode: Mode<P>) -> Self {
        Self {
            core: Core {
                area,
                cfg,
                state: State {
                    sector: cfg.sector_count,
                    loc: cfg.sector_size,
                    wrap: 0,
                    ready: false,
                },
            },
            mode,
        }
    }

    /// Mount the store: validate the configuration, scan the sectors for the
    /// write head and run mode-specific recovery.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyMounted`] if the store is mounted
    /// - [`Error::InvalidConfig`] if the configuration is rejected
    /// - [`Error::ReadOnly`] for a writable mode over a read-only area
    /// - [`Error::Io`] if a medium transaction fails
    pub fn mount(&mut self) -> Result<(), Error> {
        if self.core.state.ready {
            return Err(Error::AlreadyMounted);
        }
        let read_only_mode = matches!(self.mode, Mode::ReadOnly);
        if !read_only_mode && self.core.area.props().contains(Props::READ_ONLY) {
            return Err(Error::ReadOnly);
        }
        let compacting = matches!(&self.mode, Mode::Persistent(p) if p.compacts());
        self.core.validate_config(compacting)?;
        self.core.scan()?;
        let empty = self.core.scan_found_nothing();
        match &mut self.mode {
            Mode::ReadOnly => {
                if empty {
                    self.core.state.sector = 0;
                    self.core.state.loc = 0;
                    self.core.state.wrap = 0;
                }
            }
            Mode::Circular => {
                if empty {
                    self.core.seed()?;
                }
            }
            Mode::Persistent(policy) => {
                if empty {
                    self.core.seed()?;
                } else {
                    self.core.recover(policy)?;
                }
            }
        }
        self.core.state.ready = true;
        Ok(())
    }

    /// Unmount the store. Idempotent; performs no I/O.
    pub fn unmount(&mut self) -> Result<(), Error> {
        self.core.state.ready = false;
        Ok(())
    }

    /// Erase the whole area. Only permitted while unmounted.
    ///
    /// On media with free overwrite but no erase primitive the area is
    /// filled with its erased value instead.
    pub fn wipe(&mut self) -> Result<(), Error> {
        if self.core.state.ready {
            return Err(Error::AlreadyMounted);
        }
        self.core.wipe()
    }

    /// Append one record gathered from `parts`.
    ///
    /// The framed record is placed at the write head as a single gather
    /// write. A medium write failure skips one write block and retries
    /// within the sector, so a single defective word does not fail the log.
    ///
    /// # Errors
    ///
    /// - [`Error::NotReady`] if unmounted, [`Error::NotSupported`] in
    ///   read-only mode
    /// - [`Error::InvalidArgument`] for an empty or oversized payload
    /// - [`Error::NoSpace`] if the current sector cannot hold the record;
    ///   the state is unchanged and the caller decides between
    ///   [`Store::advance`], [`Store::compact`] or dropping the data
    pub fn append(&mut self, parts: &[&[u8]]) -> Result<RecordHandle, Error> {
        self.ensure_ready()?;
        match self.mode {
            Mode::ReadOnly => Err(Error::NotSupported),
            _ => self.core.append(parts),
        }
    }

    /// Make the next sector current.
    ///
    /// In circular mode this fills, erases and cookies as the medium
    /// requires; in persistent mode an advance is a [`Store::compact`].
    /// Documented slow: may issue many medium transactions.
    pub fn advance(&mut self) -> Result<(), Error> {
        self.ensure_ready()?;
        match &mut self.mode {
            Mode::ReadOnly => Err(Error::NotSupported),
            Mode::Circular => self.core.advance(),
            Mode::Persistent(policy) => self.core.compact(policy),
        }
    }

    /// Advance and carry live records out of the sectors that will be erased
    /// next. Persistent mode only. Documented slow.
    pub fn compact(&mut self) -> Result<(), Error> {
        self.ensure_ready()?;
        match &mut self.mode {
            Mode::Persistent(policy) => self.core.compact(policy),
            _ => Err(Error::NotSupported),
        }
    }

    /// Return the record following `prev`, or the oldest record when `prev`
    /// is `None`.
    ///
    /// Records are returned in append order per wrap; after a wrap, the
    /// surviving records of the previous pass come first. Iteration
    /// resynchronizes in write-block steps across debris from interrupted
    /// writes.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] past the last record.
    pub fn next_record(&mut self, prev: Option<&RecordHandle>) -> Result<RecordHandle, Error> {
        self.ensure_ready()?;
        self.core.next_record(prev)
    }

    /// Iterate all records from oldest to newest.
    pub fn records(&mut self) -> Records<'_, 'a, M, P> {
        Records {
            store: self,
            prev: None,
            done: false,
        }
    }

    /// Read payload bytes of `record` starting at `offset` within its data.
    ///
    /// Returns the number of bytes read, clamped to the payload end.
    pub fn read_record(
        &mut self,
        record: &RecordHandle,
        offset: u16,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        self.ensure_ready()?;
        self.core.read_record(record, offset, buf)
    }

    /// Recompute the CRC of `record` and compare it to the stored trailer.
    pub fn is_valid(&mut self, record: &RecordHandle) -> Result<bool, Error> {
        self.ensure_ready()?;
        self.core.is_valid(record)
    }

    /// Overwrite the first `prefix.len()` data bytes of `record` in place.
    ///
    /// Only permitted on areas that support some form of overwrite and for
    /// prefixes no longer than the configured CRC skip, so the record's CRC
    /// stays valid. This is the invalidation primitive: flip the first
    /// skipped byte and higher-level filters treat the record as dead while
    /// the log still scans cleanly.
    ///
    /// # Errors
    ///
    /// - [`Error::NotSupported`] if the area forbids overwrites or the mode
    ///   is read-only
    /// - [`Error::InvalidArgument`] if the prefix exceeds the CRC skip or
    ///   the record length
    pub fn update_record(&mut self, record: &RecordHandle, prefix: &[u8]) -> Result<(), Error> {
        self.ensure_ready()?;
        if matches!(self.mode, Mode::ReadOnly) {
            return Err(Error::NotSupported);
        }
        self.core.update_record(record, prefix)
    }

    /// Read the sector cookie of `sector` into `buf`.
    ///
    /// Returns the number of bytes read: the smaller of `buf.len()` and the
    /// configured cookie length.
    pub fn sector_cookie(&mut self, sector: u16, buf: &mut [u8]) -> Result<usize, Error> {
        self.ensure_ready()?;
        self.core.sector_cookie(sector, buf)
    }

    /// Whether the store is mounted.
    pub fn is_ready(&self) -> bool {
        self.core.state.ready
    }

    /// The sector the write head is in.
    pub fn current_sector(&self) -> u16 {
        self.core.state.sector
    }

    /// The next write offset within the current sector.
    pub fn write_offset(&self) -> u32 {
        self.core.state.loc
    }

    /// The current wrap counter.
    pub fn wrap_count(&self) -> u8 {
        self.core.state.wrap
    }

    /// Configured sector size in bytes.
    pub fn sector_size(&self) -> u32 {
        self.core.cfg.sector_size
    }

    /// Configured number of sectors.
    pub fn sector_count(&self) -> u16 {
        self.core.cfg.sector_count
    }

    /// Access the area underneath the store.
    ///
    /// Intended for test instrumentation and device control; writing through
    /// this while mounted invalidates the store's view of the log.
    pub fn area_mut(&mut self) -> &mut StorageArea<M> {
        &mut self.core.area
    }

    /// The compaction policy, if this store runs in persistent mode.
    pub fn policy(&self) -> Option<&P> {
        match &self.mode {
            Mode::Persistent(policy) => Some(policy),
            _ => None,
        }
    }

    /// Mutable access to the compaction policy.
    pub fn policy_mut(&mut self) -> Option<&mut P> {
        match &mut self.mode {
            Mode::Persistent(policy) => Some(policy),
            _ => None,
        }
    }

    fn ensure_ready(&self) -> Result<(), Error> {
        if !self.core.state.ready {
            return Err(Error::NotReady);
        }
        Ok(())
    }
}

/// Iterator over the records of a store, oldest first.
///
/// Yields `Err` once and stops if the underlying medium fails mid-iteration.
#[derive(Debug)]
pub struct Records<'s, 'a, M: Medium, P> {
    store: &'s mut Store<'a, M, P>,
    prev: Option<RecordHandle>,
    done: bool,
}

impl<M: Medium, P: CompactionPolicy<M>> Iterator for Records<'_, '_, M, P> {
    type Item = Result<RecordHandle, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.store.next_record(self.prev.as_ref()) {
            Ok(record) => {
                self.prev = Some(record);
                Some(Ok(record))
            }
            Err(Error::NotFound) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<M: Medium> Core<'_, M> {
    fn w(&self) -> u32 {
        self.area.write_size()
    }

    fn sector_base(&self, sector: u16) -> u32 {
        sector as u32 * self.cfg.sector_size
    }

    fn next_sector(&self, sector: u16) -> u16 {
        ((sector as u32 + 1) % self.cfg.sector_count as u32) as u16
    }

    fn cookie_reserved(&self) -> u32 {
        if self.cfg.cookie.is_empty() {
            0
        } else {
            align_up(self.cfg.cookie.len() as u32, self.w())
        }
    }

    /// Sectors covered by one erase block; one when sectors span blocks.
    fn sectors_per_block(&self) -> u16 {
        let s = self.cfg.sector_size;
        let e = self.area.erase_size();
        if s >= e { 1 } else { (e / s) as u16 }
    }

    /// Whether sector writes must erase blocks as they enter them, instead
    /// of relying on a whole-block erase at sector advance.
    fn use_erasing_writer(&self) -> bool {
        self.cfg.sector_size >= self.area.erase_size() && self.area.props().erase_before_write()
    }

    /// The wrap value records in `sector` must carry: sectors physically
    /// ahead of the head still hold the previous pass.
    fn expected_wrap(&self, sector: u16) -> u8 {
        if sector > self.state.sector {
            self.state.wrap.wrapping_sub(1)
        } else {
            self.state.wrap
        }
    }

    fn scan_found_nothing(&self) -> bool {
        self.state.sector == self.cfg.sector_count
    }

    fn validate_config(&self, compacting: bool) -> Result<(), Error> {
        let cfg = &self.cfg;
        let w = self.w();
        let e = self.area.erase_size();
        let s = cfg.sector_size;
        if s == 0 || s % w != 0 {
            return Err(Error::InvalidConfig);
        }
        if s % e != 0 && e % s != 0 {
            return Err(Error::InvalidConfig);
        }
        if cfg.sector_count == 0 {
            return Err(Error::InvalidConfig);
        }
        let total = (cfg.sector_count as u32)
            .checked_mul(s)
            .ok_or(Error::InvalidConfig)?;
        if total > self.area.capacity() {
            return Err(Error::InvalidConfig);
        }
        if cfg.spare_sectors >= cfg.sector_count {
            return Err(Error::InvalidConfig);
        }
        // A sector must hold the cookie plus at least a minimal record.
        if self.cookie_reserved() + SLOT_OVERHEAD >= s {
            return Err(Error::InvalidConfig);
        }
        // Compaction must be able to rescue a whole erase block from spares.
        if compacting && (cfg.spare_sectors as u32).saturating_mul(s) < e {
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }

    /// Basic head scan: find the highest sector still carrying the newest
    /// wrap value, then locate the end of its record chain.
    fn scan(&mut self) -> Result<(), Error> {
        let n = self.cfg.sector_count;
        self.state = State {
            sector: n,
            loc: self.cfg.sector_size,
            wrap: 0,
            ready: false,
        };
        let mut found: Option<(u16, u8)> = None;
        for i in 0..n {
            match self.probe_record(i, self.cookie_reserved(), None, false, false) {
                Ok(r) => match found {
                    None => found = Some((i, r.wrap)),
                    Some((_, wrap)) if r.wrap != wrap => break,
                    Some((_, wrap)) => found = Some((i, wrap)),
                },
                Err(Error::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        let Some((head, wrap)) = found else {
            return Ok(());
        };
        // Permissive rescan of the head sector for the last record.
        let wsz = self.w();
        let mut loc = self.cookie_reserved();
        loop {
            match self.probe_record(head, loc, Some(wrap), true, false) {
                Ok(r) => loc = r.loc + r.slot_len(wsz),
                Err(Error::NotFound) => break,
                Err(e) => return Err(e),
            }
        }
        self.state.sector = head;
        self.state.wrap = wrap;
        self.state.loc = loc;
        Ok(())
    }

    /// Seed an empty store so the first advance lands on sector zero with
    /// wrap zero and the cookie in place.
    fn seed(&mut self) -> Result<(), Error> {
        self.state.sector = self.cfg.sector_count - 1;
        self.state.loc = self.cfg.sector_size;
        self.state.wrap = u8::MAX;
        self.advance()
    }

    /// Find the first valid record in `sector` at or after `from`.
    ///
    /// `expected_wrap` gates on the sector's logical wrap when given;
    /// `recover` resynchronizes in write-block steps across debris instead
    /// of stopping at the first mismatch; `head_check` stops at the write
    /// head.
    fn probe_record(
        &mut self,
        sector: u16,
        from: u32,
        expected_wrap: Option<u8>,
        recover: bool,
        head_check: bool,
    ) -> Result<RecordHandle, Error> {
        let s = self.cfg.sector_size;
        let wsz = self.w();
        let base = self.sector_base(sector);
        let mut loc = align_up(from, wsz);
        loop {
            if head_check && sector == self.state.sector && loc >= self.state.loc {
                return Err(Error::NotFound);
            }
            if loc >= s || s - loc <= SLOT_OVERHEAD {
                return Err(Error::NotFound);
            }
            let hdr = record::read_header(&mut self.area, base + loc)?;
            let bound = s - loc - SLOT_OVERHEAD;
            let plausible = hdr.magic == MAGIC
                && hdr.len > 0
                && (hdr.len as u32) < bound
                && expected_wrap.is_none_or(|wrap| wrap == hdr.wrap);
            if plausible {
                let data = base + loc + HEADER_LEN;
                let computed =
                    record::crc_over(&mut self.area, data, hdr.len, self.cfg.crc_skip, wsz)?;
                let stored = record::read_crc(&mut self.area, data, hdr.len)?;
                if computed == stored {
                    return Ok(RecordHandle {
                        sector,
                        loc,
                        len: hdr.len,
                        wrap: hdr.wrap,
                    });
                }
            }
            if !recover {
                return Err(Error::NotFound);
            }
            loc += wsz;
        }
    }

    fn next_record(&mut self, prev: Option<&RecordHandle>) -> Result<RecordHandle, Error> {
        let n = self.cfg.sector_count as u32;
        let (mut sector, mut from) = match prev {
            None => {
                let seed = (self.state.sector as u32 + self.cfg.spare_sectors as u32 + 1) % n;
                (seed as u16, self.cookie_reserved())
            }
            Some(r) => (r.sector, r.loc + r.slot_len(self.w())),
        };
        loop {
            let expected = self.expected_wrap(sector);
            match self.probe_record(sector, from, Some(expected), true, true) {
                Ok(r) => return Ok(r),
                Err(Error::NotFound) => {
                    if sector == self.state.sector {
                        return Err(Error::NotFound);
                    }
                    sector = self.next_sector(sector);
                    from = self.cookie_reserved();
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn read_record(
        &mut self,
        r: &RecordHandle,
        offset: u16,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        if r.sector >= self.cfg.sector_count || offset > r.len {
            return Err(Error::InvalidRange);
        }
        let data = self.sector_base(r.sector) + r.loc + HEADER_LEN;
        let n = buf.len().min((r.len - offset) as usize);
        self.area.read(data + offset as u32, &mut buf[..n])?;
        Ok(n)
    }

    fn is_valid(&mut self, r: &RecordHandle) -> Result<bool, Error> {
        if r.sector >= self.cfg.sector_count {
            return Err(Error::InvalidRange);
        }
        let data = self.sector_base(r.sector) + r.loc + HEADER_LEN;
        let w = self.w();
        let computed = record::crc_over(&mut self.area, data, r.len, self.cfg.crc_skip, w)?;
        let stored = record::read_crc(&mut self.area, data, r.len)?;
        Ok(computed == stored)
    }

    fn update_record(&mut self, r: &RecordHandle, prefix: &[u8]) -> Result<(), Error> {
        if !self.area.props().overwritable() {
            return Err(Error::NotSupported);
        }
        if prefix.is_empty()
            || prefix.len() > self.cfg.crc_skip as usize
            || prefix.len() > r.len as usize
        {
            return Err(Error::InvalidArgument);
        }
        // Read-modify-write each affected write block.
        let wsz = self.w();
        let data = self.sector_base(r.sector) + r.loc + HEADER_LEN;
        let end = data + prefix.len() as u32;
        let mut block = [0u8; MAX_WRITE_BLOCK];
        let mut win = data - data % wsz;
        while win < end {
            let b = &mut block[..wsz as usize];
            self.area.read(win, b)?;
            let lo = data.max(win);
            let hi = end.min(win + wsz);
            b[(lo - win) as usize..(hi - win) as usize]
                .copy_from_slice(&prefix[(lo - data) as usize..(hi - data) as usize]);
            self.area.write(win, b)?;
            win += wsz;
        }
        Ok(())
    }

    fn sector_cookie(&mut self, sector: u16, buf: &mut [u8]) -> Result<usize, Error> {
        if sector >= self.cfg.sector_count {
            return Err(Error::InvalidRange);
        }
        let n = buf.len().min(self.cfg.cookie.len());
        if n > 0 {
            let base = self.sector_base(sector);
            self.area.read(base, &mut buf[..n])?;
        }
        Ok(n)
    }

    fn append(&mut self, parts: &[&[u8]]) -> Result<RecordHandle, Error> {
        let mut total: usize = 0;
        for part in parts {
            total += part.len();
        }
        if total == 0 || total > MAX_RECORD_LEN {
            return Err(Error::InvalidArgument);
        }
        let len = total as u16;
        loop {
            let loc = self.state.loc;
            if !self.fits(loc, len) {
                return Err(Error::NoSpace);
            }
            match self.write_frame(loc, len, parts) {
                Ok(handle) => {
                    self.state.loc = loc + handle.slot_len(self.w());
                    return Ok(handle);
                }
                // Skip the defective write block and retry further in.
                Err(Error::Io) => self.state.loc = loc + self.w(),
                Err(e) => return Err(e),
            }
        }
    }

    /// Whether a payload of `len` framed at `loc` would be accepted by a
    /// rescan: the same bound iteration validates against.
    fn fits(&self, loc: u32, len: u16) -> bool {
        let s = self.cfg.sector_size;
        loc < s && s - loc > SLOT_OVERHEAD && (len as u32) < s - loc - SLOT_OVERHEAD
    }

    fn write_frame(&mut self, loc: u32, len: u16, parts: &[&[u8]]) -> Result<RecordHandle, Error> {
        let wsz = self.w();
        let wrap = self.state.wrap;
        let base = self.sector_base(self.state.sector) + loc;
        let slot = align_up(len as u32 + SLOT_OVERHEAD, wsz);

        // CRC over the payload past the skip prefix.
        let mut hasher = crc32fast::Hasher::new();
        let mut skip = self.cfg.crc_skip as usize;
        for part in parts {
            if skip >= part.len() {
                skip -= part.len();
                continue;
            }
            hasher.update(&part[skip..]);
            skip = 0;
        }
        let crc = hasher.finalize();

        let header = Header::encode(wrap, len);
        let fill = [0xFFu8; MAX_WRITE_BLOCK];
        let mut writer = if self.use_erasing_writer() {
            self.area.writer_erasing(base)?
        } else {
            self.area.writer(base)?
        };
        writer.push(&header)?;
        for part in parts {
            writer.push(part)?;
        }
        writer.push(&crc.to_le_bytes())?;
        let mut pad = slot - (len as u32 + HEADER_LEN + TRAILER_LEN);
        while pad > 0 {
            let n = pad.min(fill.len() as u32);
            writer.push(&fill[..n as usize])?;
            pad -= n;
        }
        writer.finish()?;
        Ok(RecordHandle {
            sector: self.state.sector,
            loc,
            len,
            wrap,
        })
    }

    /// Make the next sector current: fill, step, erase, cookie.
    fn advance(&mut self) -> Result<(), Error> {
        let props = self.area.props();
        let s = self.cfg.sector_size;

        // On free-overwrite media the remainder is filled so a rescan finds
        // an unambiguous end of the record chain.
        if props.contains(Props::FULL_OVERWRITE) && self.state.loc < s {
            let base = self.sector_base(self.state.sector);
            self.area
                .fill(base + self.state.loc, s - self.state.loc, props.erased_value())?;
        }

        let next = self.next_sector(self.state.sector);
        if next == 0 {
            self.state.wrap = self.state.wrap.wrapping_add(1);
        }
        self.state.sector = next;

        // Whole-block erase at block entry; when sectors span blocks the
        // erasing writer handles each block as writes reach it instead.
        if props.erase_before_write() && !self.use_erasing_writer() {
            let e = self.area.erase_size();
            let base = self.sector_base(next);
            if base % e == 0 {
                self.area.erase(base / e, 1)?;
            }
        }

        self.state.loc = 0;
        if !self.cfg.cookie.is_empty() {
            let reserved = self.cookie_reserved();
            let base = self.sector_base(next);
            let fill = [0xFFu8; MAX_WRITE_BLOCK];
            let mut writer = if self.use_erasing_writer() {
                self.area.writer_erasing(base)?
            } else {
                self.area.writer(base)?
            };
            writer.push(self.cfg.cookie)?;
            let pad = reserved - self.cfg.cookie.len() as u32;
            writer.push(&fill[..pad as usize])?;
            writer.finish()?;
            self.state.loc = reserved;
        }
        Ok(())
    }

    /// Advance, then rescue live records out of the erase block's worth of
    /// sectors that begin `spare_sectors` ahead of the new head.
    fn compact<P: CompactionPolicy<M>>(&mut self, policy: &mut P) -> Result<(), Error> {
        self.advance()?;
        let e = self.area.erase_size();
        if self.sector_base(self.state.sector) % e != 0 {
            return Ok(());
        }
        let n = self.cfg.sector_count as u32;
        let mut src =
            (((self.state.sector as u32) + self.cfg.spare_sectors as u32) % n) as u16;
        let mut remaining = self.sectors_per_block();
        while remaining > 0 {
            let extra = self.rescue_sector(src, policy)?;
            remaining += extra;
            remaining -= 1;
            src = self.next_sector(src);
        }
        Ok(())
    }

    /// Move every record `policy` keeps out of `src` to the write head.
    /// Returns the number of additional sectors threatened by cascaded
    /// advances.
    fn rescue_sector<P: CompactionPolicy<M>>(
        &mut self,
        src: u16,
        policy: &mut P,
    ) -> Result<u16, Error> {
        let wsz = self.w();
        let expected = self.expected_wrap(src);
        let mut extra = 0u16;
        let mut from = self.cookie_reserved();
        loop {
            let r = match self.probe_record(src, from, Some(expected), true, false) {
                Ok(r) => r,
                Err(Error::NotFound) => return Ok(extra),
                Err(e) => return Err(e),
            };
            from = r.loc + r.slot_len(wsz);
            let data = self.sector_base(src) + r.loc + HEADER_LEN;
            let keep = {
                let mut view = RecordView {
                    area: &mut self.area,
                    handle: r,
                    data,
                };
                policy.keep(&mut view)
            };
            if !keep {
                continue;
            }
            loop {
                match self.move_record(&r) {
                    Ok(dst) => {
                        policy.relocated(&r, &dst);
                        break;
                    }
                    Err(Error::NoSpace) => {
                        if self.state.loc <= self.cookie_reserved() {
                            // The record cannot fit an empty sector.
                            return Err(Error::NoSpace);
                        }
                        self.advance()?;
                        if self.sector_base(self.state.sector) % self.area.erase_size() == 0 {
                            extra += self.sectors_per_block();
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    /// Re-frame `src` at the write head with the current wrap counter. The
    /// payload and therefore the CRC are unchanged; only the header differs.
    fn move_record(&mut self, src: &RecordHandle) -> Result<RecordHandle, Error> {
        let wsz = self.w();
        let len = src.len;
        let src_data = self.sector_base(src.sector) + src.loc + HEADER_LEN;
        let crc = record::read_crc(&mut self.area, src_data, len)?;
        loop {
            let loc = self.state.loc;
            if !self.fits(loc, len) {
                return Err(Error::NoSpace);
            }
            match self.copy_frame(loc, src_data, len, crc) {
                Ok(dst) => {
                    self.state.loc = loc + dst.slot_len(wsz);
                    return Ok(dst);
                }
                Err(Error::Io) => self.state.loc = loc + wsz,
                Err(e) => return Err(e),
            }
        }
    }

    /// Write a record frame at `loc` whose payload is streamed from another
    /// location on the same area, one write block at a time.
    fn copy_frame(
        &mut self,
        loc: u32,
        src_data: u32,
        len: u16,
        crc: u32,
    ) -> Result<RecordHandle, Error> {
        let wsz = self.w();
        let header = Header::encode(self.state.wrap, len);
        let crc_bytes = crc.to_le_bytes();
        let slot = align_up(len as u32 + SLOT_OVERHEAD, wsz);
        let dst = self.sector_base(self.state.sector) + loc;
        let erase_on_entry = self.use_erasing_writer();
        let e = self.area.erase_size();
        let data_end = HEADER_LEN + len as u32;
        let crc_end = data_end + TRAILER_LEN;
        let mut block = [0u8; MAX_WRITE_BLOCK];
        let mut off = 0u32;
        while off < slot {
            let n = wsz.min(slot - off);
            let lo = off;
            let hi = off + n;
            block[..n as usize].fill(0xFF);
            if lo < HEADER_LEN {
                let end = hi.min(HEADER_LEN);
                block[..(end - lo) as usize]
                    .copy_from_slice(&header[lo as usize..end as usize]);
            }
            let dlo = lo.max(HEADER_LEN);
            let dhi = hi.min(data_end);
            if dlo < dhi {
                let at = (dlo - lo) as usize;
                self.area.read(
                    src_data + (dlo - HEADER_LEN),
                    &mut block[at..at + (dhi - dlo) as usize],
                )?;
            }
            let clo = lo.max(data_end);
            let chi = hi.min(crc_end);
            if clo < chi {
                let at = (clo - lo) as usize;
                block[at..at + (chi - clo) as usize]
                    .copy_from_slice(&crc_bytes[(clo - data_end) as usize..(chi - data_end) as usize]);
            }
            let target = dst + off;
            if erase_on_entry && target % e == 0 {
                self.area.erase(target / e, 1)?;
            }
            self.area.write(target, &block[..n as usize])?;
            off += n;
        }
        Ok(RecordHandle {
            sector: self.state.sector,
            loc,
            len,
            wrap: self.state.wrap,
        })
    }

    /// Detect and finish a compaction interrupted by power loss.
    ///
    /// The probed window is the erase block's worth of sectors one past the
    /// spare window: the sources of any in-flight compaction, whichever way
    /// the crash fell. If the crash hit before the head sector took its
    /// first copy, the scan recovers the head one sector back and the window
    /// is exactly the crashed compaction's source block; if the copies
    /// landed, the head scans forward and the window is the next block due.
    /// Either way, records the policy still keeps there mean work is owed,
    /// and one compaction from the recovered head rescues exactly the probed
    /// window — it cannot duplicate copies that already landed, because the
    /// window has moved past their source.
    fn recover<P: CompactionPolicy<M>>(&mut self, policy: &mut P) -> Result<(), Error> {
        let n = self.cfg.sector_count as u32;
        let spb = self.sectors_per_block();
        let wsz = self.w();

        let mut pending = 0u32;
        for j in 0..spb {
            let sector = ((self.state.sector as u32
                + self.cfg.spare_sectors as u32
                + 1
                + j as u32)
                % n) as u16;
            let expected = self.expected_wrap(sector);
            let mut from = self.cookie_reserved();
            loop {
                let r = match self.probe_record(sector, from, Some(expected), false, false) {
                    Ok(r) => r,
                    Err(Error::NotFound) => break,
                    Err(e) => return Err(e),
                };
                from = r.loc + r.slot_len(wsz);
                let data = self.sector_base(sector) + r.loc + HEADER_LEN;
                let mut view = RecordView {
                    area: &mut self.area,
                    handle: r,
                    data,
                };
                if policy.keep(&mut view) {
                    pending += 1;
                }
            }
        }
        if pending == 0 {
            return Ok(());
        }
        self.compact(policy)
    }

    fn wipe(&mut self) -> Result<(), Error> {
        match self.area.erase(0, self.area.erase_blocks()) {
            Err(Error::NotSupported) if self.area.props().contains(Props::FULL_OVERWRITE) => {
                let value = self.area.props().erased_value();
                self.area.fill(0, self.area.capacity(), value)
            }
            result => result,
        }
    }
}
