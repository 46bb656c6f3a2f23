//! Shared test utilities for coursedrop integration tests.
//!
//! - `EngineHarness` wires a `JobEngine` to an in-memory task store and a
//!   temporary staging directory
//! - scripted fakes stand in for the fetch tool, uploader and webhook

#![allow(dead_code)]

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::{Captured, EngineHarness, CONTENT_DOMAIN};
