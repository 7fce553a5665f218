//! This crate defines [structs for the in-memory DRED format](format/index.html),
//! [the device removal reasons](errors/index.html) a DRED payload can report, and
//! [some common traits](traits/index.html) used by related crates.
//!
//! You probably don't want to use this crate directly, the [dred][dred] crate provides
//! the actual functionality of decoding DRED payloads using the structs defined in this crate.
//!
//! [dred]: ../dred/index.html

// HRESULTs and `*_INVALID` enumerants sit above `i32::MAX`.
#![allow(overflowing_literals)]

pub mod errors;
pub mod format;
pub mod traits;
