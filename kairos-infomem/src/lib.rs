//! Infomem: a wear-aware record store over raw information-memory flash
//!
//! The information memory is four small erasable flash segments set apart
//! from program flash. This crate manages a directory of variable-length
//! records inside that window, identified by one-byte tags, surviving
//! power loss and spending as few erase cycles as the edits allow.
//!
//! - On-media layout and sentinels: [`layout`]
//! - Readiness check and record operations: [`Infomem`]
//! - Typed serde values over records: [`value`] (feature `serde`)
//!
//! Call [`Infomem::ready`] before anything else; use [`Infomem::init`]
//! only when `ready` reports that no directory is present. Mutating
//! operations return [`Error::Locked`] while another is in flight - retry
//! on a later pass instead of spinning.
//!
//! Hardware access goes through the `kairos-hal` traits, so everything
//! here runs unmodified against the simulated backend on the host.

#![no_std]
#![deny(unsafe_code)]

#[cfg(test)]
extern crate std;

mod engine;
pub mod error;
pub mod layout;
mod program;
mod store;
#[cfg(feature = "serde")]
pub mod value;

pub use error::Error;
pub use store::Infomem;
