//! Type-erased envelope codec for runtime-determined types.

use std::any::Any;

use crate::codecs::{Binding, EnvelopeSerializer, ObjectGraph, RuntimeType};
use crate::envelope::{EmptyElementPolicy, EnvelopeFraming, NilMode};
use crate::error::EnvelopeError;
use crate::xml::{EnvelopeReader, EnvelopeWriter};

/// Envelope codec over a [`RuntimeType`], for call sites that only know
/// the payload type at runtime. Decode always materializes the whole
/// content into one buffer; there is no pooling benefit to claim when the
/// type (and thus any sizing hint) is dynamic.
///
/// A self-closing element with no nil marker reads as nil by default
/// ([`EmptyElementPolicy::TreatAsNil`]); see
/// [`with_empty_element_policy`](GenericCodec::with_empty_element_policy).
pub struct GenericCodec {
    framing: EnvelopeFraming,
    ty: RuntimeType,
    binding: Binding,
}

impl GenericCodec {
    /// Builds a codec for the given runtime type. Fails with
    /// [`EnvelopeError::CacheInstantiation`] when the type carries no
    /// serializer binding.
    pub fn new(ty: RuntimeType, nil_mode: NilMode) -> Result<Self, EnvelopeError> {
        let Some(binding) = ty.binding() else {
            return Err(EnvelopeError::CacheInstantiation {
                type_name: ty.name().to_string(),
                reason: "type has no serializer binding".to_string(),
            });
        };
        Ok(Self {
            framing: EnvelopeFraming::new(nil_mode, EmptyElementPolicy::TreatAsNil),
            ty,
            binding,
        })
    }

    /// Shorthand for `GenericCodec::new(RuntimeType::of::<T>(), nil_mode)`.
    #[must_use]
    pub fn for_type<T>(nil_mode: NilMode) -> Self
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
    {
        Self {
            framing: EnvelopeFraming::new(nil_mode, EmptyElementPolicy::TreatAsNil),
            ty: RuntimeType::of::<T>(),
            binding: Binding::of::<T>(),
        }
    }

    /// Overrides how a self-closing, unmarked element is read.
    #[must_use]
    pub fn with_empty_element_policy(mut self, policy: EmptyElementPolicy) -> Self {
        self.framing = self.framing.with_empty_policy(policy);
        self
    }

    /// The type this codec serves.
    #[must_use]
    pub fn runtime_type(&self) -> &RuntimeType {
        &self.ty
    }
}

impl EnvelopeSerializer for GenericCodec {
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
                let payload = (self.binding.encode)(graph)?;
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
        let prologue = self.framing.read_prologue(reader, verify_name)?;
        if self.framing.is_nil(prologue) {
            self.framing.finish(reader, prologue)?;
            return Ok(None);
        }
        let content = if prologue.self_closing {
            Vec::new()
        } else {
            reader.read_base64_to_end()?
        };
        self.framing.finish(reader, prologue)?;
        Ok(Some((self.binding.decode)(&content)?))
    }
}
