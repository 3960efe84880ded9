//! # bock-oci
//!
//! OCI (Open Container Initiative) specification types for Bock.
//!
//! This crate provides Rust types for the parts of the OCI Runtime
//! Specification (config.json) that build-step mounts produce.

#![warn(missing_docs)]

pub mod runtime;

pub use runtime::Mount;
