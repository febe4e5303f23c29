#![no_std]
#![allow(dead_code)]

//! Phylum is a log-structured filesystem for raw NOR/NAND flash and SD
//! cards. It carves a device into per-file extents at format time, appends
//! data in sector/block-chained log order, and keeps a sparse index per file
//! so seeks over large files don't require a full scan. A wandering
//! superblock persists allocator and tree state across two fixed anchor
//! blocks so that a crash mid-update never loses the previous, still-valid
//! state.
//!
//! The crate never talks to real media directly: callers implement
//! [`storage::StorageBackend`] for their driver. [`storage::MemoryStorage`]
//! is provided for tests and host tooling.

extern crate alloc;

pub mod allocator;
pub mod block;
pub mod crc;
pub mod error;
pub mod file;
pub mod geometry;
pub mod index;
pub mod layout;
pub mod recovery;
pub mod storage;
pub mod superblock;
pub mod tree;

pub use error::{BaseError, CanFail, PhylumError, PhylumResult};
pub use geometry::{BlockAddress, Geometry, SectorAddress};
