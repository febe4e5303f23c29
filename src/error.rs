//! Error taxonomy shared by every component.
//!
//! Follows the same shape as a `BaseError`/`CanFail` split: a marker trait
//! any error implements, a `CanFail<T>` alias for fallible operations with no
//! useful payload, and a single crate-wide enum with an `Exception` escape
//! hatch for errors this crate didn't anticipate (a caller's storage driver
//! error, an allocation failure).

use core::fmt::Debug;

use alloc::boxed::Box;
use alloc::collections::TryReserveError;

/// Implemented by every error type in this crate, and by anything an
/// embedder wraps into a [`PhylumError::Exception`].
pub trait BaseError: Debug {}

/// Return type for operations that either succeed or fail with no payload.
pub type CanFail<T> = Result<(), T>;

/// Crate-wide result alias.
pub type PhylumResult<T> = Result<T, PhylumError>;

/// The error taxonomy described by the external-interfaces contract:
/// storage failures, corruption, exhaustion, broken invariants, normal
/// end-of-file, and bad arguments.
#[derive(Debug)]
pub enum PhylumError {
    /// A `read`, `write`, or `erase` call into the storage backend failed.
    StorageFailure,

    /// A magic value or checksum did not match where one was expected.
    Corruption,

    /// No free block satisfies the allocation request.
    OutOfSpace,

    /// An internal invariant was violated (e.g. a write to a read-only
    /// file, or an atomic write larger than a sector can hold). Fatal via
    /// `debug_assert!` in debug builds; returned to the caller in release.
    Invariant,

    /// Normal end-of-file condition on a read.
    EndOfFile,

    /// A caller-supplied argument is out of range (e.g. seeking past a
    /// preallocated file's declared maximum size).
    InvalidArgument,

    /// Any error this crate didn't anticipate, carried through as a trait
    /// object so callers can downcast if they know the concrete type.
    Exception(Box<dyn BaseError>),
}

impl BaseError for PhylumError {}

impl BaseError for TryReserveError {}

impl core::fmt::Display for PhylumError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PhylumError::StorageFailure => write!(f, "storage backend operation failed"),
            PhylumError::Corruption => write!(f, "corrupt on-disk structure"),
            PhylumError::OutOfSpace => write!(f, "no free block available"),
            PhylumError::Invariant => write!(f, "internal invariant violated"),
            PhylumError::EndOfFile => write!(f, "end of file"),
            PhylumError::InvalidArgument => write!(f, "invalid argument"),
            PhylumError::Exception(e) => write!(f, "wrapped error: {:?}", e),
        }
    }
}
