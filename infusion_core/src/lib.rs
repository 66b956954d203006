#![forbid(unsafe_code)]

//! Core decision tables and monitoring engine for bedside infusion titration.
//!
//! This crate provides:
//! - Domain types (readings, flags, titration decisions)
//! - Protocol rule engines (heparin, non-DKA insulin, DKA/HHS phases)
//! - Monitoring engine with sliding-window provider notifications
//! - Trend series aggregation and CSV export
//! - Persistence (key-value store, calculation history, preferences)

pub mod types;
pub mod error;
pub mod bands;
pub mod config;
pub mod logging;
pub mod heparin;
pub mod insulin;
pub mod dka;
pub mod store;
pub mod monitor;
pub mod trend;
pub mod history;
pub mod persist;
pub mod export;
pub mod controller;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use heparin::titrate_heparin;
pub use insulin::{adjust_rate, initial_rate};
pub use dka::{dka_bolus, dka_initiation, dka_phase1_continuation, dka_phase2, dka_transition};
pub use monitor::{ClearScope, MonitorSettings, MonitoringState, MonitoringStatus};
pub use trend::{build_series, SeriesSelector, TrendPoint};
pub use history::{CalculationHistory, HistoryEntry};
pub use persist::{FileStore, KeyValueStore, MemoryStore};
pub use controller::{Controller, Preferences};
