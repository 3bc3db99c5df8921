//! # hashspill Configuration Module
//!
//! This module centralizes all configuration constants for hashspill. Constants
//! are grouped by their functional area and interdependencies are documented
//! and enforced through compile-time assertions.
//!
//! Per-table options (key columns, duplicate handling, row caps) live on
//! [`crate::hashtable::HashTableBuilder`]; only values shared by every table
//! belong here.
//!
//! ## Module Organization
//!
//! - [`constants`]: All numeric configuration values with dependency documentation

pub mod constants;
pub use constants::*;
