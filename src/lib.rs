
// Mark the crate as no_std if the feature is enabled (and only)
#![cfg_attr(all(feature = "no_std", not(test)), no_std)]

#[allow(unused_extern_crates)]
extern crate core; // makes rls actually look into the standard library (hack)

#[cfg_attr(target_os = "none", panic_handler)]
#[cfg(target_os = "none")]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

macro_rules! using_std { ($($i:item)*) => ($(#[cfg(not(feature = "no_std"))]$i)*) }

pub mod storage;
pub use storage::{Clock, Flash};

pub mod image;

pub mod config;
pub mod fat;

pub mod device;
pub use device::ConfigDisk;

pub mod util;
