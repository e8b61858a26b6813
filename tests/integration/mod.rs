//! Integration tests for dbexec.

pub mod postgres_test;
pub mod runner_test;
