//! Service Layer
//!
//! Business logic of the director: experiment lifecycle, compilation,
//! infrastructure fan-out, and the supervisor loop.

pub mod compilation;
pub mod experiment;
pub mod infrastructure;
pub mod processor;
