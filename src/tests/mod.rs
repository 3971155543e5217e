//! Scenario and property tests across modules.
//!
//! These tests exercise whole workflows (arithmetic, selection, masking,
//! rebinning, extraction) on small synthetic cubes.

mod helpers;
mod scenario_tests;
