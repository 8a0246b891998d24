//! Juno remote build library.
//!
//! This crate pushes a generated firmware project to a throwaway branch of a
//! GitHub repository, waits for GitHub Actions to publish the build artifact,
//! and retrieves the firmware binary through a resumable download engine. It
//! is used by the `juno-remote` CLI binary and can be consumed
//! programmatically with injected collaborators for testing.
//!
//! # Modules
//!
//! - [`archive`] - Zip extraction with path traversal protection
//! - [`cancel`] - Cancellable waits for polling and retry back-off
//! - [`ci`] - GitHub Actions artifact and workflow run queries
//! - [`cli`] - Command-line argument definitions
//! - [`config`] - Immutable configuration loaded from `juno.toml`
//! - [`error`] - Error classification shared by every stage
//! - [`exec`] - External command execution with timeouts
//! - [`fetch`] - Artifact archive download and binary selection
//! - [`http`] - Shared HTTP agent construction
//! - [`output`] - Progress output helpers
//! - [`pipeline`] - Publish, watch, and fetch orchestration
//! - [`publish`] - Project publication to a fresh remote branch
//! - [`request`] - Build request and credential types
//! - [`transfer`] - Resumable, retrying file downloads
//! - [`watch`] - Bounded polling for a published artifact

pub mod archive;
pub mod cancel;
pub mod ci;
pub mod cli;
pub mod config;
pub mod error;
pub mod exec;
pub mod fetch;
pub mod http;
pub mod output;
pub mod pipeline;
pub mod publish;
pub mod request;
pub mod transfer;
pub mod watch;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
