
use core::fmt::Debug;

// TODO: grow this into word sizes other than halfwords if a port ever needs
// one.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ProgramError<T> {
    /// For calls to `program_halfword` that fall outside of the user-data
    /// region.
    OutOfRange { requested_offset: usize },
    /// The target halfword was not in the erased state (`0xFFFF`); flash can
    /// only clear bits, so the program request cannot take effect.
    NotErased { requested_offset: usize },
    Other(T),
}

impl<T> From<T> for ProgramError<T> {
    fn from(other: T) -> Self {
        ProgramError::Other(other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum EraseError<T> {
    /// Reading back after the erase found a byte that is not `0xFF`.
    ///
    /// Some parts signal this through a status flag instead; implementations
    /// can fold that into this variant or use `Other`.
    Verify { offset: usize },
    Other(T),
}

impl<T> From<T> for EraseError<T> {
    fn from(other: T) -> Self {
        EraseError::Other(other)
    }
}

/// Implementors of this trait provide access to the flash region that backs
/// the disk image.
///
/// Addresses are byte offsets into the region; the implementation owns the
/// mapping onto absolute addresses (on hardware, usually linker symbols for
/// the region's start and size). The region is treated as one logically
/// erasable unit: `erase_region` erases all of it, even when the part
/// underneath has finer granularity.
///
/// Erase and program are synchronous and may block for tens to hundreds of
/// milliseconds; callers confine them to the main-loop side of the engine.
pub trait Flash {
    type ProgramErr: Debug;
    type EraseErr: Debug;

    /// Unlocks the flash for erasing/programming.
    fn unlock(&mut self);

    /// Locks the flash again to prevent stray writes.
    fn lock(&mut self);

    /// Erases the entire region back to `0xFF`.
    fn erase_region(&mut self) -> Result<(), EraseError<Self::EraseErr>>;

    /// Programs one halfword at the given (even) byte offset.
    ///
    /// Must fail with [`ProgramError::NotErased`] if the target halfword is
    /// not currently `0xFFFF`.
    fn program_halfword(
        &mut self,
        offset: usize,
        value: u16,
    ) -> Result<(), ProgramError<Self::ProgramErr>>;

    /// Copies `buffer.len()` bytes out of the region, starting at `offset`.
    ///
    /// Flash reads are plain memory reads on every supported part, so this
    /// is infallible; an out-of-range request is a caller bug and may panic.
    fn read(&self, offset: usize, buffer: &mut [u8]);

    /// Returns the region size in bytes.
    fn region_size(&self) -> usize;
}

/// A monotonic millisecond tick, wrapping at `u32::MAX`.
///
/// Consumers must compare ticks with `wrapping_sub`, never with `<`.
pub trait Clock {
    fn now_ms(&mut self) -> u32;
}

using_std! {
    use std::fmt::{self, Display};

    macro_rules! err {
        ($ty:ident) => {
            impl<T: Debug> Display for $ty<T> {
                fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
                    Debug::fmt(self, fmt)
                }
            }

            impl<T: Debug> std::error::Error for $ty<T> { }
        };
    }

    err!(ProgramError);
    err!(EraseError);
}
