//! Small helpers with no better home.

pub mod bits;

pub use bits::Bits;
