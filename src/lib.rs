//! Polly - HTTP record/replay intermediary
//!
//! In record mode every request is forwarded to a fixed upstream and the
//! exchange is captured into a HAR session file. In replay mode the session
//! is loaded and requests are answered from it without contacting upstream.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod config;
pub mod error;
pub mod network;
pub mod proxy;
pub mod recording;
pub mod replay;
pub mod storage;

pub use error::{PollyError, Result};
