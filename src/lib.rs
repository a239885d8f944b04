#![warn(clippy::pedantic, missing_docs)]
#![allow(clippy::doc_markdown, clippy::missing_errors_doc)]
#![doc = include_str!("../README.md")]

//! ## ⚠️ The ambiguous empty envelope
//! A self-closing `<msgpack />` with no nil attribute means different
//! things to different codec variants under the default nil mode. The
//! defaults preserve how existing deployments behave; read the docs for
//! [`EmptyElementPolicy`] before mixing variants across a wire.

pub mod cache;
pub mod codecs;
pub mod contract;
pub mod envelope;
pub mod error;
pub mod pool;
pub mod xml;

pub use envelope::{ENVELOPE_TAG, EmptyElementPolicy, NilMode};
pub use error::EnvelopeError;
