//! Compression-wrapped typed codec.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codecs::{EnvelopeSerializer, ObjectGraph};
use crate::envelope::{EmptyElementPolicy, EnvelopeFraming, NilMode};
use crate::error::EnvelopeError;
use crate::xml::{EnvelopeReader, EnvelopeWriter};

/// A reversible byte transform applied around the msgpack payload.
///
/// Contract: `decompress(compress(x)) == x` for every finite byte
/// sequence `x`, including the empty one. `compress` itself need not be
/// deterministic.
pub trait Compressor: Send + Sync {
    /// Compresses a payload.
    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, EnvelopeError>;

    /// Reverses [`compress`](Compressor::compress).
    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, EnvelopeError>;
}

/// LZ4 block compression with a length prefix, the transform the existing
/// deployments use.
#[derive(Clone, Copy, Default)]
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        Ok(lz4_flex::compress_prepend_size(bytes))
    }

    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        lz4_flex::decompress_size_prepended(bytes)
            .map_err(|e| EnvelopeError::Compression(e.to_string()))
    }
}

/// [`TypedCodec`](crate::codecs::TypedCodec) semantics with the payload
/// run through a [`Compressor`]: encode is `compress(msgpack(value))`,
/// decode is `msgpack(decompress(content))`. The envelope protocol is
/// unchanged, so nil envelopes and tag handling behave exactly like the
/// uncompressed variants.
///
/// Decode always reads the whole content before decompressing, so this
/// variant does not use the buffer pool.
pub struct CompressedTypedCodec<T> {
    framing: EnvelopeFraming,
    transform: Arc<dyn Compressor>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CompressedTypedCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Builds a codec around the given transform.
    #[must_use]
    pub fn new(nil_mode: NilMode, transform: Arc<dyn Compressor>) -> Self {
        Self {
            framing: EnvelopeFraming::new(nil_mode, EmptyElementPolicy::DecodeEmptyPayload),
            transform,
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
                let payload = self.transform.compress(&rmp_serde::to_vec(value)?)?;
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
        let content = if prologue.self_closing {
            Vec::new()
        } else {
            let content = reader.read_base64_to_end()?;
            self.framing.finish(reader, prologue)?;
            content
        };
        let payload = self.transform.decompress(&content)?;
        Ok(Some(rmp_serde::from_slice(&payload)?))
    }
}

impl<T> EnvelopeSerializer for CompressedTypedCodec<T>
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
                let payload = self.transform.compress(&rmp_serde::to_vec(value)?)?;
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
    use crate::xml::{XmlTextReader, XmlTextWriter};
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Record {
        id: u32,
        name: String,
    }

    #[test]
    fn lz4_round_trips_arbitrary_bytes() {
        let transform = Lz4Compressor;
        for payload in [
            Vec::new(),
            vec![0u8],
            b"hello hello hello hello".to_vec(),
            (0..=255u8).cycle().take(4096).collect(),
        ] {
            let compressed = transform.compress(&payload).unwrap();
            assert_eq!(transform.decompress(&compressed).unwrap(), payload);
        }
    }

    #[test]
    fn lz4_rejects_garbage() {
        assert!(matches!(
            Lz4Compressor.decompress(&[1, 2, 3]),
            Err(EnvelopeError::Compression(_))
        ));
    }

    #[test]
    fn round_trips_a_record() {
        let codec =
            CompressedTypedCodec::<Record>::new(NilMode::SelfClosing, Arc::new(Lz4Compressor));
        let record = Record {
            id: 42,
            name: "abc".repeat(100),
        };
        let mut writer = XmlTextWriter::new();
        codec.write_value(&mut writer, Some(&record)).unwrap();

        let mut reader = XmlTextReader::new(&writer.into_string());
        assert_eq!(codec.read_value(&mut reader, true).unwrap(), Some(record));
    }

    #[test]
    fn nil_round_trips_in_both_modes() {
        for mode in [NilMode::SelfClosing, NilMode::NilAttribute] {
            let codec = CompressedTypedCodec::<Record>::new(mode, Arc::new(Lz4Compressor))
                .with_empty_element_policy(EmptyElementPolicy::TreatAsNil);
            let mut writer = XmlTextWriter::new();
            codec.write_value(&mut writer, None).unwrap();

            let mut reader = XmlTextReader::new(&writer.into_string());
            assert_eq!(codec.read_value(&mut reader, true).unwrap(), None);
        }
    }

    #[test]
    fn compressed_and_plain_typed_decode_agree() {
        use crate::codecs::TypedCodec;

        let record = Record {
            id: 9,
            name: "payload".to_string(),
        };
        let compressed =
            CompressedTypedCodec::<Record>::new(NilMode::SelfClosing, Arc::new(Lz4Compressor));
        let plain = TypedCodec::<Record>::new(NilMode::SelfClosing);

        let mut writer = XmlTextWriter::new();
        compressed.write_value(&mut writer, Some(&record)).unwrap();
        let mut reader = XmlTextReader::new(&writer.into_string());
        let via_compressed = compressed.read_value(&mut reader, true).unwrap();

        let mut writer = XmlTextWriter::new();
        plain.write_value(&mut writer, Some(&record)).unwrap();
        let mut reader = XmlTextReader::new(&writer.into_string());
        let via_plain = plain.read_value(&mut reader, true).unwrap();

        assert_eq!(via_compressed, via_plain);
        assert_eq!(via_compressed, Some(record));
    }
}
