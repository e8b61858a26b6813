//! dbexec - run pre-approved, parameterized SQL inside a single transaction.
//!
//! This library exposes the core modules for use by the binary and in
//! integration tests.

pub mod binder;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod preview;
pub mod report;
pub mod runner;
