//! discd: watches optical drives and hands every inserted disc to exactly one
//! ripper, ejecting the tray when the rip is done.

pub mod adapters;
pub mod config;
pub mod context;
pub mod core;
pub mod logging;
