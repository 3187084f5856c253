//! Crate-internal test suites and shared fixtures

pub mod support;

mod resilience_tests;
