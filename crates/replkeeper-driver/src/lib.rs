//! # replkeeper driver
//!
//! The seam between the replkeeper reconciliation engine and whatever actually talks to the
//! cluster. The engine never frames wire messages itself: it hands a [`Command`] (a command name
//! plus payload) to a [`ClusterDriver`] and receives a JSON document back.
//!
//! ## Overview
//!
//! This crate defines:
//! - **Traits**: [`ClusterDriver`], [`DriverFactory`]
//! - **Types**: [`Endpoint`], [`ConnectMode`], [`Command`]
//! - **Errors**: [`DriverError`], [`DriverResult`]
//!
//! ## Usage
//!
//! Driver implementations depend on this crate and implement both traits:
//!
//! ```rust,ignore
//! use replkeeper_driver::{ClusterDriver, DriverFactory, Endpoint, ConnectMode};
//!
//! #[derive(Debug)]
//! struct MyFactory;
//!
//! impl DriverFactory for MyFactory {
//!     fn open(&self, endpoint: &Endpoint, mode: ConnectMode) -> BoxFuture<'_, DriverResult<Box<dyn ClusterDriver>>> {
//!         // ...
//!     }
//! }
//! ```
//!
//! ## Features
//!
//! - `mongodb` - a [`ClusterDriver`] backed by the official `mongodb` crate

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

mod command;
mod endpoint;
mod error;
mod traits;

#[cfg(feature = "mongodb")]
#[cfg_attr(docsrs, doc(cfg(feature = "mongodb")))]
pub mod mongo;

pub use command::Command;
pub use endpoint::{ConnectMode, DEFAULT_PORT, Endpoint};
pub use error::{DriverError, DriverResult};
pub use traits::{ClusterDriver, DriverFactory};
