//! Order automation for the cooking game.
//!
//! This module provides:
//! - Configuration loading and validation
//! - Key emission with an abort signal checked before every press
//! - Pixel classification of page dots, step indicators and slots
//! - The per-order state machine and the order loop
//! - CSV log of processed orders

pub mod config;
pub mod csv_writer;
pub mod detection;
pub mod input;
pub mod runner;
pub mod state;

pub use runner::{dry_run, run_live};
