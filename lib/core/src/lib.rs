//! Core types and utilities for the portcullis gateway.
//!
//! This crate provides the foundational types shared by the gateway's
//! authentication, authorization and serving layers.

pub mod claims;
pub mod error;

pub use claims::{Claims, ClaimsError};
pub use error::Result;
