//! rsplib-test-harness: Test utilities and a fake transport for rsplib.
//!
//! This crate provides [`FakeTransport`] for deterministic unit testing of
//! session, dispatch and routing logic without requiring receiver hardware.

pub mod fake_transport;

pub use fake_transport::{AppliedUpdate, FakeOp, FakeTransport};
