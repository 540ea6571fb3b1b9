//! Platform-specific socket enumeration and process resolution.
//!
//! Exactly one backend is exported as [`NativePlatform`] per target.
//! The command-output parsers of the other backends are still compiled
//! under `cfg(test)` so their fixtures run everywhere.

#[cfg(any(target_os = "macos", all(test, unix)))]
mod darwin;
#[cfg(target_os = "linux")]
mod linux;
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
mod unsupported;
#[cfg(any(target_os = "macos", target_os = "windows", test))]
mod utils;
#[cfg(any(target_os = "windows", test))]
mod windows;

#[cfg(target_os = "macos")]
pub use darwin::{DarwinPass, DarwinPlatform as NativePlatform};
#[cfg(target_os = "linux")]
pub use linux::{LinuxPass, LinuxPlatform as NativePlatform};
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
pub use unsupported::UnsupportedPlatform as NativePlatform;
#[cfg(target_os = "windows")]
pub use windows::{WindowsPass, WindowsPlatform as NativePlatform};

