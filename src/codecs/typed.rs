//! Statically typed envelope codec with pooled streaming decode.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::codecs::{EnvelopeSerializer, ObjectGraph};
use crate::envelope::{EmptyElementPolicy, EnvelopeFraming, NilMode};
use crate::error::EnvelopeError;
use crate::pool::BufferPool;
use crate::xml::{EnvelopeReader, EnvelopeWriter};

/// Envelope codec for a type known at compile time.
///
/// The decode path is the performance-sensitive one: when the reader can
/// report the decoded content length up front and it fits the pool's lease
/// limit, the content streams into a buffer leased from the shared
/// [`BufferPool`] instead of a fresh allocation. Oversized or
/// unknown-length payloads fall back to the same read-all path the generic
/// codec uses. Encode always produces one full buffer and never touches
/// the pool.
///
/// A self-closing element with no nil marker decodes as a zero-length
/// payload by default ([`EmptyElementPolicy::DecodeEmptyPayload`]); see
/// [`with_empty_element_policy`](TypedCodec::with_empty_element_policy).
pub struct TypedCodec<T> {
    framing: EnvelopeFraming,
    pool: Arc<BufferPool>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Builds a codec with its own default-sized pool. Codecs that should
    /// share one pool use [`with_pool`](TypedCodec::with_pool).
    #[must_use]
    pub fn new(nil_mode: NilMode) -> Self {
        Self::with_pool(nil_mode, Arc::new(BufferPool::default()))
    }

    /// Builds a codec drawing decode buffers from `pool`. The pool is
    /// shared freely across codecs of unrelated types; leases are keyed
    /// only by size.
    #[must_use]
    pub fn with_pool(nil_mode: NilMode, pool: Arc<BufferPool>) -> Self {
        Self {
            framing: EnvelopeFraming::new(nil_mode, EmptyElementPolicy::DecodeEmptyPayload),
            pool,
            _marker: PhantomData,
        }
    }

    /// Overrides how a self-closing, unmarked element is read.
    #[must_use]
    pub fn with_empty_element_policy(mut self, policy: EmptyElementPolicy) -> Self {
        self.framing = self.framing.with_empty_policy(policy);
        self
    }

    /// Writes one envelope carrying `value`, or a nil envelope for `None`.
    pub fn write_value<W: EnvelopeWriter + ?Sized>(
        &self,
        writer: &mut W,
        value: Option<&T>,
    ) -> Result<(), EnvelopeError> {
        self.framing.write_start(writer)?;
        match value {
            None => self.framing.write_nil(writer)?,
            Some(value) => {
                let payload = rmp_serde::to_vec(value)?;
                self.framing.write_payload(writer, &payload)?;
            }
        }
        self.framing.write_end(writer)
    }

    /// Reads one envelope, returning `None` for a nil envelope.
    pub fn read_value<R: EnvelopeReader + ?Sized>(
        &self,
        reader: &mut R,
        verify_name: bool,
    ) -> Result<Option<T>, EnvelopeError> {
        let prologue = self.framing.read_prologue(reader, verify_name)?;
        if self.framing.is_nil(prologue) {
            self.framing.finish(reader, prologue)?;
            return Ok(None);
        }
        if prologue.self_closing {
            // Zero-length payload: hand the decoder an empty sequence.
            return Ok(Some(rmp_serde::from_slice(&[])?));
        }

        if let Some(len) = reader.base64_content_length() {
            if let Some(mut lease) = self.pool.lease(len) {
                // The reader may hand content back in arbitrary chunks;
                // keep reading at increasing offsets until it reports 0.
                let mut position = 0;
                loop {
                    let read = reader.read_base64(&mut lease.as_mut_slice()[position..])?;
                    if read == 0 {
                        break;
                    }
                    position += read;
                }
                if position != len {
                    return Err(EnvelopeError::MalformedEnvelope(format!(
                        "content length {len} was declared but {position} bytes were read"
                    )));
                }
                self.framing.finish(reader, prologue)?;
                // The lease drops (and its buffer returns to the pool)
                // whether or not this decode succeeds.
                return Ok(Some(rmp_serde::from_slice(&lease.as_slice()[..position])?));
            }
            warn!(
                len,
                max_lease = self.pool.max_lease(),
                "payload exceeds lease limit, decoding unpooled"
            );
        }

        let content = reader.read_base64_to_end()?;
        self.framing.finish(reader, prologue)?;
        Ok(Some(rmp_serde::from_slice(&content)?))
    }

    /// Whether the reader is positioned on an envelope element.
    pub fn is_start_value<R: EnvelopeReader + ?Sized>(
        &self,
        reader: &mut R,
    ) -> Result<bool, EnvelopeError> {
        self.framing.is_start(reader)
    }
}

impl<T> EnvelopeSerializer for TypedCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn write_start(&self, writer: &mut dyn EnvelopeWriter) -> Result<(), EnvelopeError> {
        self.framing.write_start(writer)
    }

    fn write_content(
        &self,
        writer: &mut dyn EnvelopeWriter,
        graph: Option<&(dyn Any + Send + Sync)>,
    ) -> Result<(), EnvelopeError> {
        match graph {
            None => self.framing.write_nil(writer),
            Some(graph) => {
                let value = graph
                    .downcast_ref::<T>()
                    .ok_or(EnvelopeError::ArgumentInvalid("graph"))?;
                let payload = rmp_serde::to_vec(value)?;
                self.framing.write_payload(writer, &payload)
            }
        }
    }

    fn write_end(&self, writer: &mut dyn EnvelopeWriter) -> Result<(), EnvelopeError> {
        self.framing.write_end(writer)
    }

    fn is_start(&self, reader: &mut dyn EnvelopeReader) -> Result<bool, EnvelopeError> {
        self.framing.is_start(reader)
    }

    fn read(
        &self,
        reader: &mut dyn EnvelopeReader,
        verify_name: bool,
    ) -> Result<Option<ObjectGraph>, EnvelopeError> {
        Ok(self
            .read_value(reader, verify_name)?
            .map(|value| Box::new(value) as ObjectGraph))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::GenericCodec;
    use crate::xml::{XmlTextReader, XmlTextWriter};
    use serde::Deserialize;
    use std::sync::Barrier;
    use std::thread;

    #[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
    struct Record {
        id: u32,
        name: String,
    }

    fn sample() -> Record {
        Record {
            id: 42,
            name: "abc".to_string(),
        }
    }

    fn encode_sample(codec: &TypedCodec<Record>) -> String {
        let mut writer = XmlTextWriter::new();
        codec.write_value(&mut writer, Some(&sample())).unwrap();
        writer.into_string()
    }

    #[test]
    fn round_trips_through_the_pool() {
        let codec = TypedCodec::<Record>::new(NilMode::SelfClosing);
        let text = encode_sample(&codec);
        assert!(text.starts_with("<msgpack>"));
        assert!(text.ends_with("</msgpack>"));

        let mut reader = XmlTextReader::new(&text);
        assert_eq!(codec.read_value(&mut reader, true).unwrap(), Some(sample()));
    }

    #[test]
    fn tolerates_partial_content_reads() {
        let codec = TypedCodec::<Record>::new(NilMode::SelfClosing);
        let text = encode_sample(&codec);
        let mut reader = XmlTextReader::new(&text).with_chunk_size(3);
        assert_eq!(codec.read_value(&mut reader, true).unwrap(), Some(sample()));
    }

    #[test]
    fn oversized_payload_falls_back_and_matches_generic() {
        let pool = Arc::new(BufferPool::new(256, 16));
        let codec = TypedCodec::<Record>::with_pool(NilMode::SelfClosing, Arc::clone(&pool));
        let big = Record {
            id: 7,
            name: "x".repeat(64),
        };
        let mut writer = XmlTextWriter::new();
        codec.write_value(&mut writer, Some(&big)).unwrap();
        let text = writer.into_string();

        let mut reader = XmlTextReader::new(&text);
        let typed = codec.read_value(&mut reader, true).unwrap().unwrap();

        let generic = GenericCodec::for_type::<Record>(NilMode::SelfClosing);
        let mut reader = XmlTextReader::new(&text);
        let erased = generic.read(&mut reader, true).unwrap().unwrap();
        assert_eq!(erased.downcast_ref::<Record>(), Some(&typed));
        assert_eq!(typed, big);
        // Nothing was pooled along the way.
        assert_eq!(pool.pooled_bytes(), 0);
    }

    #[test]
    fn unknown_length_falls_back_to_read_all() {
        let codec = TypedCodec::<Record>::new(NilMode::SelfClosing);
        let text = encode_sample(&codec);
        let mut reader = XmlTextReader::new(&text).with_unknown_length();
        assert_eq!(codec.read_value(&mut reader, true).unwrap(), Some(sample()));
    }

    #[test]
    fn nil_round_trips_under_attribute_mode() {
        let codec = TypedCodec::<Record>::new(NilMode::NilAttribute);
        let mut writer = XmlTextWriter::new();
        codec.write_value(&mut writer, None).unwrap();
        let text = writer.into_string();
        assert_eq!(text, r#"<msgpack nil="true" />"#);

        let mut reader = XmlTextReader::new(&text);
        assert_eq!(codec.read_value(&mut reader, true).unwrap(), None);
    }

    #[test]
    fn self_closing_element_decodes_as_empty_payload_by_default() {
        // The historical typed serializer ran the decoder on zero bytes
        // here, and zero bytes are not a valid Record.
        let codec = TypedCodec::<Record>::new(NilMode::SelfClosing);
        let mut reader = XmlTextReader::new("<msgpack />");
        assert!(matches!(
            codec.read_value(&mut reader, true),
            Err(EnvelopeError::Decode(_))
        ));
    }

    #[test]
    fn nil_policy_override_restores_round_trip_in_default_mode() {
        let codec = TypedCodec::<Record>::new(NilMode::SelfClosing)
            .with_empty_element_policy(EmptyElementPolicy::TreatAsNil);
        let mut writer = XmlTextWriter::new();
        codec.write_value(&mut writer, None).unwrap();
        let text = writer.into_string();
        assert_eq!(text, "<msgpack />");

        let mut reader = XmlTextReader::new(&text);
        assert_eq!(codec.read_value(&mut reader, true).unwrap(), None);
    }

    #[test]
    fn nil_marker_with_content_is_malformed() {
        // An envelope cannot both declare nil and carry a payload; the
        // leftover content must fail the read rather than be ignored.
        let codec = TypedCodec::<Record>::new(NilMode::NilAttribute);
        let mut reader = XmlTextReader::new(r#"<msgpack nil="true">AAEC</msgpack>"#);
        assert!(matches!(
            codec.read_value(&mut reader, true),
            Err(EnvelopeError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn lease_returns_to_pool_when_decode_fails() {
        let pool = Arc::new(BufferPool::new(1024, 512));
        let codec = TypedCodec::<Record>::with_pool(NilMode::SelfClosing, Arc::clone(&pool));
        // Valid base64, invalid msgpack for Record.
        let mut reader = XmlTextReader::new("<msgpack>/w==</msgpack>");
        assert!(codec.read_value(&mut reader, true).is_err());
        assert_eq!(pool.pooled_bytes(), 64);
    }

    #[test]
    fn concurrent_decodes_never_cross_messages() {
        let pool = Arc::new(BufferPool::new(512, 256));
        let codec = Arc::new(TypedCodec::<Record>::with_pool(
            NilMode::SelfClosing,
            Arc::clone(&pool),
        ));
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let codec = Arc::clone(&codec);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let record = Record {
                        id: u32::try_from(i).unwrap(),
                        name: format!("message-{i}").repeat(4),
                    };
                    let mut writer = XmlTextWriter::new();
                    codec.write_value(&mut writer, Some(&record)).unwrap();
                    let text = writer.into_string();
                    barrier.wait();
                    for _ in 0..100 {
                        let mut reader = XmlTextReader::new(&text);
                        let back = codec.read_value(&mut reader, true).unwrap();
                        assert_eq!(back.as_ref(), Some(&record));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
