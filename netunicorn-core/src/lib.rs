//! netunicorn Core
//!
//! Core types and abstractions for the netunicorn experiment platform.
//!
//! This crate contains:
//! - Domain types: Core business entities (Experiment, Deployment, Pipeline, Task, ...)
//! - DTOs: Data transfer objects for inter-service communication

pub mod domain;
pub mod dto;
pub mod serde_bytes;
