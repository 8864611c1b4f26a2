//! Kairos Hardware Abstraction Layer
//!
//! This crate defines hardware abstraction traits that can be implemented
//! by chip-specific backends. This enables the same allocator and
//! application code to run on different hardware platforms, including a
//! simulated flash model for host testing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Application (kairos-infomem, etc.)     │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  kairos-hal (this crate - traits)       │
//! └─────────────────────────────────────────┘
//!                     │
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │  chip backend │       │ kairos-hal-   │
//! │  (real flash) │       │ sim (host)    │
//! └───────────────┘       └───────────────┘
//! ```
//!
//! # Traits
//!
//! - [`flash::InfoFlash`] - Segmented information-memory flash
//! - [`watchdog::Watchdog`] - Watchdog hold/resume around long flash commits

#![no_std]
#![deny(unsafe_code)]

pub mod flash;
#[cfg(feature = "embedded-storage")]
pub mod nor;
pub mod watchdog;

// Re-export key traits at crate root for convenience
pub use flash::{FlashError, InfoFlash, WordAddr};
pub use watchdog::{Watchdog, WatchdogPause};
