//! `pypack` crate (library surface).
//!
//! The primary entrypoint for end users is the `pypack` binary (CLI + MCP stdio).
//! This library module exists to support embedding the pipeline without depending on the
//! internal crate layout.

pub use pypack_core as core;
pub use pypack_local as local;
