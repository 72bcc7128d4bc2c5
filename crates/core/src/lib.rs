//! Core types for plcflow
//!
//! This crate defines the pieces every other plcflow crate builds on:
//! - [`Error`] / [`Result`]: the error taxonomy of the admission core
//! - [`CancellationToken`]: cooperative cancellation for blocking waits
//! - Identifier aliases for transactions and work items

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod error;

pub use cancel::{CancellationToken, POLL_INTERVAL};
pub use error::{Error, Result, TransactionId, WorkItemId};
