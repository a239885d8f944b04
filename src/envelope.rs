//! # Envelope element protocol
//!
//! Every codec variant writes and reads the same single XML element. The
//! element name is a wire constant: peers on the other side of the
//! transport match it byte for byte, so it must never change.
//!
//! Absence of a value ("nil") has two mutually exclusive encodings,
//! selected per deployment at codec construction and agreed out of band:
//!
//! - [`NilMode::SelfClosing`] (default): nil is `<msgpack />`
//! - [`NilMode::NilAttribute`]: nil is `<msgpack nil="true" />`
//!
//! A self-closing element with *no* nil attribute is ambiguous under
//! [`NilMode::SelfClosing`]; [`EmptyElementPolicy`] makes each codec's
//! reading of that shape explicit instead of guessing a unified answer.

use crate::error::EnvelopeError;
use crate::xml::{EnvelopeReader, EnvelopeWriter};

/// Name of the envelope element. Interop-critical: identical across every
/// implementation of this convention, compared case-sensitively with no
/// namespace or prefix tolerance.
pub const ENVELOPE_TAG: &str = "msgpack";

/// Attribute marking an explicit nil under [`NilMode::NilAttribute`].
pub(crate) const NIL_ATTRIBUTE: &str = "nil";

/// Attribute value marking nil. Compared ordinally.
pub(crate) const NIL_TRUE: &str = "true";

/// How the absence of a value is put on the wire.
///
/// Writer and reader of a deployment must agree on the mode out of band;
/// it is not negotiated per message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NilMode {
    /// Nil is a self-closing element with no attributes.
    #[default]
    SelfClosing,
    /// Nil carries an explicit `nil="true"` attribute on an empty element.
    NilAttribute,
}

/// What a codec does with a self-closing element that carries no nil
/// attribute while running in [`NilMode::SelfClosing`].
///
/// The two historical serializers disagreed on this exact input shape, so
/// the answer is a per-codec policy rather than a global rule:
/// [`GenericCodec`](crate::codecs::GenericCodec) defaults to
/// [`TreatAsNil`](EmptyElementPolicy::TreatAsNil), while
/// [`TypedCodec`](crate::codecs::TypedCodec) and
/// [`CompressedTypedCodec`](crate::codecs::CompressedTypedCodec) default to
/// [`DecodeEmptyPayload`](EmptyElementPolicy::DecodeEmptyPayload). Either
/// can be overridden at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmptyElementPolicy {
    /// The element denotes "no value".
    TreatAsNil,
    /// The element is a zero-length payload: the decode hook runs on an
    /// empty byte sequence.
    DecodeEmptyPayload,
}

/// Facts gathered from the envelope start tag before it is consumed.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Prologue {
    /// The element was self-closing (`<msgpack />`).
    pub self_closing: bool,
    /// The `nil="true"` attribute was present.
    pub nil_attribute: bool,
}

/// Shared envelope read/write protocol used by every codec variant.
#[derive(Clone, Copy, Debug)]
pub(crate) struct EnvelopeFraming {
    nil_mode: NilMode,
    empty_policy: EmptyElementPolicy,
}

impl EnvelopeFraming {
    pub fn new(nil_mode: NilMode, empty_policy: EmptyElementPolicy) -> Self {
        Self {
            nil_mode,
            empty_policy,
        }
    }

    pub fn with_empty_policy(self, empty_policy: EmptyElementPolicy) -> Self {
        Self {
            empty_policy,
            ..self
        }
    }

    /// Emits the opening envelope tag.
    pub fn write_start<W: EnvelopeWriter + ?Sized>(self, writer: &mut W) -> Result<(), EnvelopeError> {
        writer.write_start_element(ENVELOPE_TAG)
    }

    /// Emits the matching closing tag.
    pub fn write_end<W: EnvelopeWriter + ?Sized>(self, writer: &mut W) -> Result<(), EnvelopeError> {
        writer.write_end_element()
    }

    /// Marks the envelope as carrying no value. Under
    /// [`NilMode::SelfClosing`] nothing is written; the element closes
    /// itself. Under [`NilMode::NilAttribute`] the nil attribute is added.
    pub fn write_nil<W: EnvelopeWriter + ?Sized>(self, writer: &mut W) -> Result<(), EnvelopeError> {
        match self.nil_mode {
            NilMode::SelfClosing => Ok(()),
            NilMode::NilAttribute => writer.write_attribute(NIL_ATTRIBUTE, NIL_TRUE),
        }
    }

    /// Writes the binary payload as base64 text content.
    pub fn write_payload<W: EnvelopeWriter + ?Sized>(
        self,
        writer: &mut W,
        payload: &[u8],
    ) -> Result<(), EnvelopeError> {
        writer.write_base64(payload)
    }

    /// Whether the reader is positioned on an envelope element. Exact,
    /// case-sensitive name comparison only.
    pub fn is_start<R: EnvelopeReader + ?Sized>(self, reader: &mut R) -> Result<bool, EnvelopeError> {
        reader.move_to_content()?;
        Ok(reader.node_name() == Some(ENVELOPE_TAG))
    }

    /// Records the element shape and consumes the start tag, verifying the
    /// element name first when `verify_name` is set.
    pub fn read_prologue<R: EnvelopeReader + ?Sized>(
        self,
        reader: &mut R,
        verify_name: bool,
    ) -> Result<Prologue, EnvelopeError> {
        reader.move_to_content()?;
        if verify_name {
            let name = reader.node_name().unwrap_or_default();
            if name != ENVELOPE_TAG {
                return Err(EnvelopeError::MalformedEnvelope(format!(
                    "expected element `{ENVELOPE_TAG}`, found `{name}`"
                )));
            }
        }
        let prologue = Prologue {
            self_closing: reader.is_empty_element(),
            nil_attribute: reader.attribute(NIL_ATTRIBUTE) == Some(NIL_TRUE),
        };
        reader.read_start_element()?;
        Ok(prologue)
    }

    /// Whether the prologue denotes "no value" under this framing's mode
    /// and empty-element policy.
    pub fn is_nil(self, prologue: Prologue) -> bool {
        match self.nil_mode {
            NilMode::NilAttribute => prologue.nil_attribute,
            NilMode::SelfClosing => {
                prologue.self_closing && self.empty_policy == EmptyElementPolicy::TreatAsNil
            }
        }
    }

    /// Consumes the end tag unless the start tag already closed the
    /// element.
    pub fn finish<R: EnvelopeReader + ?Sized>(
        self,
        reader: &mut R,
        prologue: Prologue,
    ) -> Result<(), EnvelopeError> {
        if prologue.self_closing {
            return Ok(());
        }
        reader.read_end_element()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{XmlTextReader, XmlTextWriter};

    fn framing(mode: NilMode, policy: EmptyElementPolicy) -> EnvelopeFraming {
        EnvelopeFraming::new(mode, policy)
    }

    #[test]
    fn nil_self_closing_mode_writes_bare_element() {
        let f = framing(NilMode::SelfClosing, EmptyElementPolicy::TreatAsNil);
        let mut writer = XmlTextWriter::new();
        f.write_start(&mut writer).unwrap();
        f.write_nil(&mut writer).unwrap();
        f.write_end(&mut writer).unwrap();
        assert_eq!(writer.into_string(), "<msgpack />");
    }

    #[test]
    fn nil_attribute_mode_writes_marker() {
        let f = framing(NilMode::NilAttribute, EmptyElementPolicy::TreatAsNil);
        let mut writer = XmlTextWriter::new();
        f.write_start(&mut writer).unwrap();
        f.write_nil(&mut writer).unwrap();
        f.write_end(&mut writer).unwrap();
        assert_eq!(writer.into_string(), r#"<msgpack nil="true" />"#);
    }

    #[test]
    fn is_start_matches_exact_tag_only() {
        let f = framing(NilMode::SelfClosing, EmptyElementPolicy::TreatAsNil);
        let mut reader = XmlTextReader::new("<msgpack />");
        assert!(f.is_start(&mut reader).unwrap());

        let mut reader = XmlTextReader::new("<Msgpack />");
        assert!(!f.is_start(&mut reader).unwrap());

        let mut reader = XmlTextReader::new("<msgpack2 />");
        assert!(!f.is_start(&mut reader).unwrap());
    }

    #[test]
    fn prologue_records_shape_and_marker() {
        let f = framing(NilMode::NilAttribute, EmptyElementPolicy::TreatAsNil);
        let mut reader = XmlTextReader::new(r#"<msgpack nil="true" />"#);
        let prologue = f.read_prologue(&mut reader, true).unwrap();
        assert!(prologue.self_closing);
        assert!(prologue.nil_attribute);
        assert!(f.is_nil(prologue));
    }

    #[test]
    fn verify_name_rejects_other_elements() {
        let f = framing(NilMode::SelfClosing, EmptyElementPolicy::TreatAsNil);
        let mut reader = XmlTextReader::new("<other />");
        assert!(matches!(
            f.read_prologue(&mut reader, true),
            Err(EnvelopeError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn unverified_read_accepts_any_name() {
        let f = framing(NilMode::SelfClosing, EmptyElementPolicy::TreatAsNil);
        let mut reader = XmlTextReader::new("<other />");
        let prologue = f.read_prologue(&mut reader, false).unwrap();
        assert!(prologue.self_closing);
    }

    #[test]
    fn empty_element_policy_controls_nil_reading() {
        let bare = Prologue {
            self_closing: true,
            nil_attribute: false,
        };
        let nil_policy = framing(NilMode::SelfClosing, EmptyElementPolicy::TreatAsNil);
        let payload_policy = framing(NilMode::SelfClosing, EmptyElementPolicy::DecodeEmptyPayload);
        assert!(nil_policy.is_nil(bare));
        assert!(!payload_policy.is_nil(bare));

        // Under the attribute mode only the marker decides.
        let attr_mode = framing(NilMode::NilAttribute, EmptyElementPolicy::TreatAsNil);
        assert!(!attr_mode.is_nil(bare));
    }
}
