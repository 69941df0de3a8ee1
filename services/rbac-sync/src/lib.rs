//! rbac-sync service library crate.
//!
//! # Purpose
//! Exposes configuration, observability wiring, the Postgres store backend
//! and the command implementations for use by the binary and tests.
//!
//! # Notes
//! The reconciliation logic lives in `rbac-sync-core`; this crate only wires
//! it to a database, the environment and the command line.
pub mod commands;
pub mod config;
pub mod observability;
pub mod store;
