//! Development host for the tsbridge session bridge.
//!
//! Drives a [`tsbridge::Bridge`] over [`direct::DirectEngine`], which dials
//! with ordinary sockets, so every bridge operation can be tried from a shell.

pub mod cli;
pub mod commands;
pub mod config;
pub mod direct;
pub mod error;
pub mod logging;
pub mod state;
