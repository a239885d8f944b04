//! # Per-type serializer cache
//!
//! One codec instance exists per payload type for the cache's lifetime.
//! The cache is an explicit service object: construct it once with the
//! deployment's [`CodecProfile`], share it via `Arc`, and hand it to the
//! contract adapter. Lookup is a double-checked read/write lock dance so
//! repeated calls stay on the read path and construction runs at most
//! once per type, even under concurrent first calls.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::codecs::{
    Binding, Compressor, EnvelopeSerializer, GenericCodec, RuntimeType,
};
use crate::envelope::NilMode;
use crate::error::EnvelopeError;
use crate::pool::BufferPool;

/// Which codec variant the cache instantiates for each type.
#[derive(Clone)]
pub enum CodecKind {
    /// Type-erased [`GenericCodec`], for when no pooling benefit is
    /// justified.
    Generic,
    /// Statically typed [`TypedCodec`](crate::codecs::TypedCodec) with
    /// pooled decode.
    Typed,
    /// [`CompressedTypedCodec`](crate::codecs::CompressedTypedCodec)
    /// around the given transform.
    CompressedTyped(Arc<dyn Compressor>),
}

impl std::fmt::Debug for CodecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generic => f.write_str("Generic"),
            Self::Typed => f.write_str("Typed"),
            Self::CompressedTyped(_) => f.write_str("CompressedTyped"),
        }
    }
}

/// Deployment-wide codec configuration: nil convention plus variant
/// choice. Built once and given to the [`SerializerCache`].
#[derive(Clone, Debug)]
pub struct CodecProfile {
    /// How nil envelopes are put on the wire.
    pub nil_mode: NilMode,
    /// Which variant to construct per type.
    pub kind: CodecKind,
}

impl Default for CodecProfile {
    fn default() -> Self {
        Self {
            nil_mode: NilMode::default(),
            kind: CodecKind::Typed,
        }
    }
}

/// Concurrency-safe map from payload type to its codec instance.
pub struct SerializerCache {
    profile: CodecProfile,
    pool: Arc<BufferPool>,
    entries: RwLock<HashMap<TypeId, Arc<dyn EnvelopeSerializer>>>,
}

impl SerializerCache {
    /// Creates a cache with its own default-sized decode buffer pool.
    #[must_use]
    pub fn new(profile: CodecProfile) -> Self {
        Self::with_pool(profile, Arc::new(BufferPool::default()))
    }

    /// Creates a cache whose typed codecs draw from `pool`.
    #[must_use]
    pub fn with_pool(profile: CodecProfile, pool: Arc<BufferPool>) -> Self {
        Self {
            profile,
            pool,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the codec for `T`, constructing it on first call. Repeated
    /// calls, from any thread, return the same instance.
    pub fn get_or_create<T>(&self) -> Result<Arc<dyn EnvelopeSerializer>, EnvelopeError>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.get_or_create_dyn(&RuntimeType::of::<T>())
    }

    /// Type-erased lookup for contract machinery that only holds a
    /// [`RuntimeType`]. Fails with [`EnvelopeError::CacheInstantiation`]
    /// when the type has no serializer binding.
    pub fn get_or_create_dyn(
        &self,
        ty: &RuntimeType,
    ) -> Result<Arc<dyn EnvelopeSerializer>, EnvelopeError> {
        let Some(binding) = ty.binding() else {
            return Err(EnvelopeError::CacheInstantiation {
                type_name: ty.name().to_string(),
                reason: "type has no serializer binding".to_string(),
            });
        };

        if let Some(codec) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&binding.id)
        {
            return Ok(Arc::clone(codec));
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Re-check under the write lock: another thread may have won the
        // race between our read and write acquisitions. Construction
        // below runs while the lock is held, so it happens at most once.
        if let Some(codec) = entries.get(&binding.id) {
            return Ok(Arc::clone(codec));
        }
        let codec = self.instantiate(ty, binding)?;
        debug!(type_name = ty.name(), kind = ?self.profile.kind, "instantiated envelope serializer");
        entries.insert(binding.id, Arc::clone(&codec));
        Ok(codec)
    }

    /// Number of codec instances constructed so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no codec has been constructed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn instantiate(
        &self,
        ty: &RuntimeType,
        binding: Binding,
    ) -> Result<Arc<dyn EnvelopeSerializer>, EnvelopeError> {
        Ok(match &self.profile.kind {
            CodecKind::Generic => Arc::new(GenericCodec::new(ty.clone(), self.profile.nil_mode)?),
            CodecKind::Typed => (binding.make_typed)(self.profile.nil_mode, Arc::clone(&self.pool)),
            CodecKind::CompressedTyped(transform) => {
                (binding.make_compressed)(self.profile.nil_mode, Arc::clone(transform))
            }
        })
    }
}
