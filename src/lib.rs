//! Clientele - client statistics, segmentation and deduplication for a
//! DJ booking CRM.
//!
//! # Overview
//!
//! Clientele keeps two linked record sets, clients and the prestations
//! (billable services) performed for them. From each client's prestations
//! it derives revenue statistics and a segmentation:
//!
//! - **lifecycle**: `actif` (< 90 days since the last prestation),
//!   `en_veille` (90 to 365 days) or `a_relancer` (longer, or never)
//! - **VIP**: at least 10 prestations, at least 5000 of revenue, or at least
//!   5 prestations while active
//!
//! Records are fed by an idempotent CSV import and kept clean by a
//! duplicate detector.
//!
//! # Modules
//!
//! - [`model`]: Data types for clients, prestations, stats and reports
//! - [`keys`]: Deterministic id derivation
//! - [`parse`]: Lenient amount and date parsing
//! - [`aggregation`]: Stats computation and segmentation refresh
//! - [`dedup`]: Duplicate detection and cleanup
//! - [`import`]: CSV import pipeline
//! - [`records`]: Manual prestation edits
//! - [`storage`]: SQLite storage layer
//! - [`config`]: Environment configuration
//! - [`api`]: HTTP API handlers

pub mod aggregation;
pub mod api;
pub mod config;
pub mod dedup;
pub mod error;
pub mod import;
pub mod keys;
pub mod model;
pub mod parse;
pub mod records;
pub mod storage;
