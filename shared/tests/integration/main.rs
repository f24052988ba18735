//! Integration test driver for `tests/integration/`.
//!
//! Each `mod` below exercises one component against the scripted
//! [`mock_service::MockService`]. Time is simulated, so nothing sleeps.

mod mock_service;
mod session_tests;
