//! Core types and trait definitions for the Cadence recurring-appointment
//! engine.
//!
//! This crate is deliberately free of HTTP, database, and runtime
//! dependencies. Everything that touches I/O (persistence, availability
//! checks, charging, notification) is expressed as a trait here and
//! implemented elsewhere.

pub mod collab;
pub mod error;
pub mod generator;
pub mod occurrence;
pub mod pattern;
pub mod payment;
pub mod series;
pub mod store;

pub use error::{Error, Result, ValidationError, Violation, ViolationKind};
