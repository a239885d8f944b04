//! # Envelope codec variants
//! - type-erased: [`GenericCodec`]
//! - statically typed, pooled decode: [`TypedCodec`]
//! - LZ4-wrapped typed: [`CompressedTypedCodec`]
//!
//! ## What does an envelope codec do?
//! Each variant speaks the same envelope element protocol and differs only
//! in its encode/decode hooks: how the binary payload is produced from an
//! object graph and how the content bytes become an object again. All
//! variants are chosen at construction time; the
//! [`SerializerCache`](crate::cache::SerializerCache) picks one per type
//! based on its [`CodecProfile`](crate::cache::CodecProfile).

mod compressed;
mod generic;
mod runtime;
mod typed;

use std::any::Any;

pub use compressed::{CompressedTypedCodec, Compressor, Lz4Compressor};
pub use generic::GenericCodec;
pub use runtime::RuntimeType;
pub use typed::TypedCodec;

pub(crate) use runtime::Binding;

use crate::error::EnvelopeError;
use crate::xml::{EnvelopeReader, EnvelopeWriter};

/// Object graph handed through the type-erased surface.
pub type ObjectGraph = Box<dyn Any + Send + Sync>;

/// Object-safe surface shared by every codec variant, used by the
/// [`SerializerCache`](crate::cache::SerializerCache) and the contract
/// adapter, which only know types at runtime.
///
/// The typed variants also expose inherent `write_value` / `read_value`
/// methods that skip the `Any` boxing; prefer those when the type is known
/// at compile time.
pub trait EnvelopeSerializer: Send + Sync {
    /// Emits the opening envelope tag.
    fn write_start(&self, writer: &mut dyn EnvelopeWriter) -> Result<(), EnvelopeError>;

    /// Writes the envelope body: the nil marker when `graph` is `None`,
    /// otherwise the encoded payload as base64 text.
    fn write_content(
        &self,
        writer: &mut dyn EnvelopeWriter,
        graph: Option<&(dyn Any + Send + Sync)>,
    ) -> Result<(), EnvelopeError>;

    /// Emits the matching closing tag.
    fn write_end(&self, writer: &mut dyn EnvelopeWriter) -> Result<(), EnvelopeError>;

    /// Whether the reader is positioned on an envelope element.
    fn is_start(&self, reader: &mut dyn EnvelopeReader) -> Result<bool, EnvelopeError>;

    /// Reads one envelope, returning `None` for a nil envelope. The
    /// element name is verified only when `verify_name` is set.
    fn read(
        &self,
        reader: &mut dyn EnvelopeReader,
        verify_name: bool,
    ) -> Result<Option<ObjectGraph>, EnvelopeError>;

    /// Writes a whole envelope: start tag, content, end tag.
    fn write(
        &self,
        writer: &mut dyn EnvelopeWriter,
        graph: Option<&(dyn Any + Send + Sync)>,
    ) -> Result<(), EnvelopeError> {
        self.write_start(writer)?;
        self.write_content(writer, graph)?;
        self.write_end(writer)
    }
}
