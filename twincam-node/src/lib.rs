//! # twincam-node: desktop pair node
//!
//! Runs one side of a twincam pair session over TCP. The Primary dials
//! the configured address, the Secondary listens on it. Camera output
//! is synthetic, so two nodes on one machine exercise the whole
//! protocol: clock sync, preview flow control and synchronized capture.

pub mod config;
pub mod service;
