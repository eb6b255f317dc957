//! Test Utilities Crate
//!
//! Provides shared test infrastructure, fixtures, and helpers for the
//! tuition billing test suite.
//!
//! # Modules
//!
//! - `fixtures`: Pre-built calendars, subscriptions and seed bill items
//! - `builders`: Builder patterns for test data construction
//! - `database`: PostgreSQL testcontainer management
//! - `assertions`: Assertion helpers for billing invariants
//! - `generators`: Property-based test data generators

pub mod fixtures;
pub mod builders;
pub mod database;
pub mod assertions;
pub mod generators;

pub use fixtures::*;
pub use builders::*;
pub use database::*;
pub use assertions::*;
pub use generators::*;
