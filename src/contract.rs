//! # Contract-level attachment
//!
//! The host describes an RPC contract as operations with messages, parts,
//! and headers, and lets an extension swap the serializer factory each
//! operation uses. [`MsgpackContractBehavior`] is that extension: attach
//! it on the client or dispatch side and every operation resolves its
//! per-type serializers through the shared
//! [`SerializerCache`](crate::cache::SerializerCache) instead of the
//! host's default XML serializer.
//!
//! Attachment mutates the contract description in place and takes `&mut`,
//! so concurrent attaches serialize at the call site; the adapter itself
//! holds no lock beyond the cache's.

use std::sync::Arc;

use tracing::debug;

use crate::cache::SerializerCache;
use crate::codecs::{EnvelopeSerializer, RuntimeType};
use crate::error::EnvelopeError;

/// Produces the serializer for one part type of an operation.
pub type SerializerFactory =
    Arc<dyn Fn(&RuntimeType) -> Result<Arc<dyn EnvelopeSerializer>, EnvelopeError> + Send + Sync>;

/// One named value inside a message: a body part, the return value, or a
/// header.
#[derive(Clone, Debug)]
pub struct MessagePartDescription {
    /// Part name as the contract declares it.
    pub name: String,
    /// The part's payload type.
    pub ty: RuntimeType,
}

/// One direction of an operation's exchange.
#[derive(Clone, Debug, Default)]
pub struct MessageDescription {
    /// Parts carried in the message body.
    pub body_parts: Vec<MessagePartDescription>,
    /// The return value, for reply messages that have one.
    pub return_value: Option<MessagePartDescription>,
    /// Header parts.
    pub headers: Vec<MessagePartDescription>,
}

/// One operation of a contract.
pub struct OperationDescription {
    /// Operation name.
    pub name: String,
    /// The operation's messages (request, reply, faults).
    pub messages: Vec<MessageDescription>,
    /// Factory resolving each part type to its serializer. `None` means
    /// the host's default serializer is still in place.
    pub serializer_factory: Option<SerializerFactory>,
}

impl OperationDescription {
    /// An operation still using the host's default serializer.
    #[must_use]
    pub fn new(name: impl Into<String>, messages: Vec<MessageDescription>) -> Self {
        Self {
            name: name.into(),
            messages,
            serializer_factory: None,
        }
    }

    /// Resolves the serializer for one part type via the installed
    /// factory.
    pub fn serializer_for(
        &self,
        ty: &RuntimeType,
    ) -> Result<Arc<dyn EnvelopeSerializer>, EnvelopeError> {
        let factory = self
            .serializer_factory
            .as_ref()
            .ok_or(EnvelopeError::ArgumentInvalid("serializer_factory"))?;
        factory(ty)
    }
}

/// A host-described RPC contract: a named set of operations.
pub struct ContractDescription {
    /// Contract name.
    pub name: String,
    /// The contract's operations.
    pub operations: Vec<OperationDescription>,
}

/// The host's contract-level extension surface. Hosts call one of the
/// apply methods when an endpoint is built, and `validate` when the
/// contract is checked.
pub trait ContractBehavior {
    /// Attach on the client side.
    fn apply_client_behavior(&self, contract: &mut ContractDescription);

    /// Attach on the service dispatch side.
    fn apply_dispatch_behavior(&self, contract: &mut ContractDescription);

    /// Validate the contract, attaching in the process.
    fn validate(&self, contract: &mut ContractDescription) -> Result<(), EnvelopeError>;
}

/// Contract behavior that swaps every operation's serializer factory for
/// one resolving msgpack envelope codecs through a shared cache.
pub struct MsgpackContractBehavior {
    cache: Arc<SerializerCache>,
}

impl MsgpackContractBehavior {
    /// Builds the behavior around the deployment's cache.
    #[must_use]
    pub fn new(cache: Arc<SerializerCache>) -> Self {
        Self { cache }
    }

    fn replace_serializer_factories(&self, contract: &mut ContractDescription) {
        for operation in &mut contract.operations {
            // TODO: carry settings over from the factory being replaced
            // (known-type whitelist, object graph limits).
            let cache = Arc::clone(&self.cache);
            operation.serializer_factory = Some(Arc::new(move |ty| cache.get_or_create_dyn(ty)));
            debug!(
                contract = %contract.name,
                operation = %operation.name,
                "replaced default serializer factory"
            );
        }
    }

    #[allow(clippy::unused_self)]
    fn validate_part(&self, _part: &MessagePartDescription) -> Result<(), EnvelopeError> {
        // TODO: reject types the msgpack primitives cannot represent.
        Ok(())
    }
}

impl ContractBehavior for MsgpackContractBehavior {
    fn apply_client_behavior(&self, contract: &mut ContractDescription) {
        self.replace_serializer_factories(contract);
    }

    fn apply_dispatch_behavior(&self, contract: &mut ContractDescription) {
        self.replace_serializer_factories(contract);
    }

    fn validate(&self, contract: &mut ContractDescription) -> Result<(), EnvelopeError> {
        self.replace_serializer_factories(contract);
        for operation in &contract.operations {
            for message in &operation.messages {
                if let Some(return_value) = &message.return_value {
                    self.validate_part(return_value)?;
                }
                for part in &message.body_parts {
                    self.validate_part(part)?;
                }
                for header in &message.headers {
                    self.validate_part(header)?;
                }
            }
        }
        Ok(())
    }
}
