//! Error types for the catalog object model.

use crate::provider::{ExecutionError, ServerVersion};
use crate::state::{ObjectState, Verb};
use crate::value::PropertyType;

/// Errors that can occur while reading, mutating or scripting catalog objects.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The object has been dropped and rejects further operations.
    #[error("{type_name} '{name}' has been dropped")]
    ObjectDropped {
        /// Object type.
        type_name: String,
        /// Object display name.
        name: String,
    },

    /// The object is still pending: key fields or the parent are missing.
    #[error(
        "{type_name}: set {} before performing this operation",
        .missing.join(", ")
    )]
    ParentNotSet {
        /// Object type.
        type_name: String,
        /// Names of the missing key fields, plus `Parent` when no parent is set.
        missing: Vec<String>,
    },

    /// The verb is not permitted in the object's current state.
    #[error("cannot {verb} {type_name} '{name}' while it is {state}")]
    InvalidState {
        /// Rejected verb.
        verb: Verb,
        /// Object type.
        type_name: String,
        /// Object display name.
        name: String,
        /// Current state.
        state: ObjectState,
    },

    /// The object type has no handler for the verb.
    #[error("{verb} is not supported for {type_name}")]
    UnsupportedOperation {
        /// Object type.
        type_name: String,
        /// Unsupported verb.
        verb: Verb,
    },

    /// The property is not available on the target server.
    #[error("property '{property}' of {type_name} is not supported on {server}")]
    UnsupportedProperty {
        /// Object type.
        type_name: String,
        /// Property name.
        property: String,
        /// Description of the target server.
        server: String,
    },

    /// The feature requires a newer server version.
    #[error("{feature} requires version {required} or later, target is {actual}")]
    UnsupportedVersion {
        /// Feature name.
        feature: String,
        /// Minimum version.
        required: ServerVersion,
        /// Target version.
        actual: ServerVersion,
    },

    /// The type declares no property with this name.
    #[error("unknown property '{property}' on {type_name}")]
    UnknownProperty {
        /// Object type.
        type_name: String,
        /// Property name.
        property: String,
    },

    /// The property has no value and no default.
    #[error("property '{property}' of {type_name} '{name}' is not set")]
    PropertyNotSet {
        /// Object type.
        type_name: String,
        /// Object display name.
        name: String,
        /// Property name.
        property: String,
    },

    /// The property cannot be written in the object's current state.
    #[error("property '{property}' of {type_name} is read-only")]
    PropertyReadOnly {
        /// Object type.
        type_name: String,
        /// Property name.
        property: String,
    },

    /// The value does not match the property's declared type.
    #[error("property '{property}' expects {expected}, got {actual}")]
    PropertyTypeMismatch {
        /// Property name.
        property: String,
        /// Declared type.
        expected: PropertyType,
        /// Description of the supplied value.
        actual: String,
    },

    /// A full fetch completed without producing the property.
    #[error("property '{property}' of {type_name} '{name}' cannot be retrieved")]
    PropertyCannotBeRetrieved {
        /// Object type.
        type_name: String,
        /// Object display name.
        name: String,
        /// Property name.
        property: String,
    },

    /// An object with the same key already exists in the collection.
    #[error("{type_name} '{name}' already exists")]
    DuplicateObject {
        /// Object type.
        type_name: String,
        /// Object display name.
        name: String,
    },

    /// The requested object does not exist.
    #[error("{type_name} '{name}' not found")]
    MissingObject {
        /// Object type.
        type_name: String,
        /// Object display name.
        name: String,
    },

    /// The type is not registered.
    #[error("unknown object type '{0}'")]
    UnknownType(String),

    /// The key does not fit the type or is incomplete.
    #[error("invalid key for {type_name}: {reason}")]
    InvalidKey {
        /// Object type.
        type_name: String,
        /// Description of the problem.
        reason: String,
    },

    /// A hierarchical path could not be parsed or resolved.
    #[error("invalid URN '{urn}': {reason}")]
    InvalidUrn {
        /// The offending path.
        urn: String,
        /// Description of the problem.
        reason: String,
    },

    /// Executing a script against the server failed.
    #[error("{verb} failed for {object} after {executed} statement(s): {source}")]
    FailedOperation {
        /// Verb being executed.
        verb: Verb,
        /// Path of the target object.
        object: String,
        /// Number of statements that completed before the failure.
        executed: usize,
        /// Transport failure.
        #[source]
        source: ExecutionError,
    },

    /// Enumerating metadata from the server failed.
    #[error("enumeration of '{urn}' failed: {source}")]
    Enumeration {
        /// Requested path.
        urn: String,
        /// Transport failure.
        #[source]
        source: ExecutionError,
    },

    /// The connection could not report server information.
    #[error("connection error: {0}")]
    Connection(#[source] ExecutionError),

    /// Internal consistency violation.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CatalogError {
    /// Returns true if the error reports a dropped object.
    #[must_use]
    pub const fn is_object_dropped(&self) -> bool {
        matches!(self, Self::ObjectDropped { .. })
    }

    /// Returns the transport failure wrapped by this error, if any.
    #[must_use]
    pub const fn execution_error(&self) -> Option<&ExecutionError> {
        match self {
            Self::FailedOperation { source, .. }
            | Self::Enumeration { source, .. }
            | Self::Connection(source) => Some(source),
            _ => None,
        }
    }
}

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;
