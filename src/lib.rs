//! # sastore - log-structured record storage for embedded systems
//!
//! A persistent, crash-tolerant, append-only record log layered on top of a
//! generic block-addressed storage abstraction. The crate is designed for
//! `no_std` environments: no heap, bounded stack buffers, and the same log
//! code over NOR flash, EEPROM, RAM and (with the `std` feature) disk files.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Record Store                          │
//! │   append · iterate · compact · mount scan · recovery        │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Storage Area                          │
//! │   range checks · gather writes · erase blocks · ioctl       │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────┐  ┌──────────────┐  ┌──────────┐  ┌──────────┐
//! │  NOR Flash   │  │    EEPROM    │  │   RAM    │  │   Disk   │
//! └──────────────┘  └──────────────┘  └──────────┘  └──────────┘
//! ```
//!
//! - [`medium`] — the driver contract: one trait a device implements to sit
//!   under everything else, plus slice- and file-backed implementations.
//! - [`area`] — a byte-addressed view with declared write and erase geometry;
//!   gather writes always reach the medium aligned.
//! - [`store`] — the log engine: CRC-protected records in fixed-size sectors,
//!   wrap counting, circular and compacting modes, power-loss recovery.
//! - [`gate`] — optional single-owner exclusion for stores in `static`s.
//!
//! ## Usage
//!
//! ```rust
//! use sastore::area::{AreaLayout, StorageArea};
//! use sastore::medium::{Props, ram::RamMedium};
//! use sastore::store::{Store, StoreConfig};
//!
//! let mut backing = [0xFFu8; 2048];
//! let area = StorageArea::new(
//!     RamMedium::new(&mut backing, 8),
//!     AreaLayout {
//!         write_size: 8,
//!         erase_size: 512,
//!         erase_blocks: 4,
//!         props: Props::FULL_OVERWRITE,
//!     },
//! )?;
//!
//! let mut store = Store::circular(
//!     area,
//!     StoreConfig {
//!         sector_size: 512,
//!         sector_count: 4,
//!         spare_sectors: 0,
//!         crc_skip: 0,
//!         cookie: b"log1",
//!     },
//! );
//! store.mount()?;
//! store.append(&[b"temperature=23.5"])?;
//!
//! let mut cursor = None;
//! while let Ok(record) = store.next_record(cursor.as_ref()) {
//!     let mut data = [0u8; 64];
//!     let n = store.read_record(&record, 0, &mut data)?;
//!     assert_eq!(&data[..n], b"temperature=23.5");
//!     cursor = Some(record);
//! }
//! # Ok::<(), sastore::Error>(())
//! ```
//!
//! ## Optional Features
//!
//! - `std`: Enable standard library support and the file-backed disk medium
//! - `defmt`: Enable defmt formatting for errors and handles

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

/// Storage areas: byte-addressed I/O with write alignment and erase geometry.
pub mod area;

/// Common error types shared by all layers.
pub mod error;

/// Single-owner mutual exclusion for stores in shared storage.
pub mod gate;

/// The medium driver contract and the bundled device implementations.
pub mod medium;

/// The record store: append, iterate, compact, mount and recover.
pub mod store;

pub use error::Error;
