//! Command-line front end for the shade obfuscator.
//!
//! Modules are exchanged as JSON documents of the `shade-core` data model.

pub mod commands;
pub mod io;
