//! # Error taxonomy
//!
//! Every fallible operation in this crate returns [`EnvelopeError`].
//! Failures raised by the underlying msgpack primitives are carried
//! through unchanged ([`EnvelopeError::Decode`] / [`EnvelopeError::Encode`])
//! so the host pipeline sees the original error, never a rewrapped one.
//!
//! An oversized buffer lease is *not* an error: the typed codec falls back
//! to the unbounded read path internally, so no variant exists for it.

use thiserror::Error;

/// Errors produced by the envelope codecs, cache, and contract adapter.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// A supplied argument is missing or has the wrong runtime type,
    /// detected before any I/O is attempted. The payload names the
    /// offending argument.
    #[error("argument `{0}` is missing or has the wrong type")]
    ArgumentInvalid(&'static str),

    /// The envelope element failed structural checks: name mismatch when
    /// exact verification was requested, or an inconsistent combination of
    /// nil marker and content.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The msgpack decode primitive rejected the payload. Propagated as-is.
    #[error("msgpack decode failed")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The msgpack encode primitive failed. Propagated as-is.
    #[error("msgpack encode failed")]
    Encode(#[from] rmp_serde::encode::Error),

    /// The compression transform rejected its input.
    #[error("compression transform failed: {0}")]
    Compression(String),

    /// A codec instance could not be constructed for the requested type.
    #[error("cannot instantiate a serializer for `{type_name}`: {reason}")]
    CacheInstantiation {
        /// The type the cache was asked to serve.
        type_name: String,
        /// Why instantiation failed.
        reason: String,
    },
}
