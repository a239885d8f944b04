//! Runtime type descriptors binding a contract part type to the msgpack
//! encode/decode primitives without naming the type in a signature.

use std::any::{Any, TypeId};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codecs::{CompressedTypedCodec, Compressor, EnvelopeSerializer, TypedCodec};
use crate::envelope::NilMode;
use crate::error::EnvelopeError;
use crate::pool::BufferPool;

/// A type as the contract machinery sees it: a name plus, for types with a
/// Rust binding, a monomorphized bridge to the msgpack primitives and the
/// typed codec constructors.
///
/// [`RuntimeType::of`] produces a bound descriptor. [`RuntimeType::declared`]
/// produces a name-only descriptor for contract parts imported from
/// metadata; asking the cache for a codec for one of those fails with
/// [`EnvelopeError::CacheInstantiation`].
#[derive(Clone)]
pub struct RuntimeType {
    name: String,
    binding: Option<Binding>,
}

/// Monomorphized hooks captured when a Rust type is bound.
#[derive(Clone, Copy)]
pub(crate) struct Binding {
    pub id: TypeId,
    pub encode: fn(&(dyn Any + Send + Sync)) -> Result<Vec<u8>, EnvelopeError>,
    pub decode: fn(&[u8]) -> Result<Box<dyn Any + Send + Sync>, EnvelopeError>,
    pub make_typed: fn(NilMode, Arc<BufferPool>) -> Arc<dyn EnvelopeSerializer>,
    pub make_compressed: fn(NilMode, Arc<dyn Compressor>) -> Arc<dyn EnvelopeSerializer>,
}

impl Binding {
    pub(crate) fn of<T>() -> Self
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        Self {
            id: TypeId::of::<T>(),
            encode: encode_graph::<T>,
            decode: decode_graph::<T>,
            make_typed: make_typed::<T>,
            make_compressed: make_compressed::<T>,
        }
    }
}

impl RuntimeType {
    /// Descriptor for a Rust type, carrying its serializer binding.
    #[must_use]
    pub fn of<T>() -> Self
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        Self {
            name: std::any::type_name::<T>().to_string(),
            binding: Some(Binding::of::<T>()),
        }
    }

    /// Descriptor for a type known only by name, with no serializer
    /// binding. Useful for contracts imported from service metadata.
    #[must_use]
    pub fn declared(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binding: None,
        }
    }

    /// The type's display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `TypeId` of the bound Rust type, if any.
    #[must_use]
    pub fn type_id(&self) -> Option<TypeId> {
        self.binding.map(|b| b.id)
    }

    /// Whether a serializer binding is attached.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    pub(crate) fn binding(&self) -> Option<Binding> {
        self.binding
    }
}

impl std::fmt::Debug for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeType")
            .field("name", &self.name)
            .field("bound", &self.binding.is_some())
            .finish()
    }
}

fn encode_graph<T>(graph: &(dyn Any + Send + Sync)) -> Result<Vec<u8>, EnvelopeError>
where
    T: Serialize + 'static,
{
    let value = graph
        .downcast_ref::<T>()
        .ok_or(EnvelopeError::ArgumentInvalid("graph"))?;
    Ok(rmp_serde::to_vec(value)?)
}

fn decode_graph<T>(bytes: &[u8]) -> Result<Box<dyn Any + Send + Sync>, EnvelopeError>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    Ok(Box::new(rmp_serde::from_slice::<T>(bytes)?))
}

fn make_typed<T>(nil_mode: NilMode, pool: Arc<BufferPool>) -> Arc<dyn EnvelopeSerializer>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    Arc::new(TypedCodec::<T>::with_pool(nil_mode, pool))
}

fn make_compressed<T>(
    nil_mode: NilMode,
    transform: Arc<dyn Compressor>,
) -> Arc<dyn EnvelopeSerializer>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    Arc::new(CompressedTypedCodec::<T>::new(nil_mode, transform))
}
