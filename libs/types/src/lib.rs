//! Types library for the analytics fan-out service
//!
//! Provides the domain types shared between the server modules and its
//! integration tests:
//!
//! - `event`: the validated activity event record and batch filtering
//! - `window`: rolling aggregation windows and bucket-start arithmetic

pub mod event;
pub mod window;
