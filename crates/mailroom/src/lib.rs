//! # mailroom
//!
//! Wires the settings, the single-writer store and session upkeep into a
//! process. The binary is a thin shell over [`App`] and [`Cli`].

#![deny(unsafe_code)]

pub mod app;
pub mod cli;

pub use app::App;
pub use cli::{Cli, Command};
