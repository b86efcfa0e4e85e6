// Error taxonomy for the chronicle core
//
// Each subsystem has its own error enum; the crate-level `Error` folds them
// together so public entry points can return a single `Result<T>`.

use thiserror::Error;

use crate::digest::Digest;

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O failure in a filesystem-backed store.
    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored bytes failed a framing or integrity check.
    #[error("corrupt stored object: {0}")]
    Corrupt(String),
}

/// Errors raised while packing or unpacking the canonical binary form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PackingError {
    /// Value nesting exceeded the packer's depth ceiling.
    #[error("value nesting exceeds maximum depth of {0}")]
    DepthExceeded(usize),

    /// The input ended before a complete value was decoded.
    #[error("truncated packed data at offset {0}")]
    Truncated(usize),

    /// An unknown tag byte was encountered while decoding.
    #[error("unknown tag byte 0x{0:02x} at offset {1}")]
    UnknownTag(u8, usize),

    /// A decoded string was not valid UTF-8.
    #[error("packed string is not valid utf-8")]
    InvalidUtf8,

    /// A length prefix was implausibly large for the remaining input.
    #[error("length prefix {0} exceeds remaining input")]
    InvalidLength(u64),

    /// Decoding finished with unconsumed bytes.
    #[error("{0} trailing bytes after packed value")]
    TrailingBytes(usize),

    /// The packed root was not a resource.
    #[error("packed root must be a resource, got {0}")]
    NotAResource(&'static str),

    /// A type-id string embedded in packed data failed to parse.
    #[error("malformed type id in packed data: {0}")]
    MalformedTypeId(String),

    /// Bad magic bytes or version in a framed object.
    #[error("bad object framing: {0}")]
    BadFraming(String),
}

/// Errors raised by the type registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A type-id was looked up that no one registered.
    #[error("no type registered for id {0}")]
    UnknownTypeId(String),

    /// Re-registration with a different descriptor.
    #[error("type {0} already registered with a conflicting descriptor")]
    Conflict(String),

    /// The looked-up type is registered but not as an invokable.
    #[error("type {0} is not registered as an invokable")]
    NotInvokable(String),

    /// No wrapper is registered for a foreign type.
    #[error("no wrapper registered for foreign type {0}")]
    NoWrapper(String),

    /// A named free function was looked up that no one registered.
    #[error("no function registered under name {0:?}")]
    UnknownFunction(String),
}

/// Errors raised while converting between typed resources and field values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// A declared field was absent from the field mapping.
    #[error("missing field {field:?} on {type_name}")]
    MissingField {
        type_name: String,
        field: &'static str,
    },

    /// A field value had the wrong variant.
    #[error("expected {expected} value, got {found}")]
    UnexpectedKind {
        expected: &'static str,
        found: &'static str,
    },

    /// A resource dict carried a different type than requested.
    #[error("expected resource of type {expected}, got {found}")]
    TypeMismatch { expected: String, found: String },
}

/// A divergence between a recorded invocation and a live re-execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayError {
    /// Position of the diverging call in the recorded children list.
    pub call_index: usize,
    /// Digest of the recorded callable resource.
    pub expected_invokable: Digest,
    /// Digest of the recorded input.
    pub expected_input: Digest,
    /// Digest of the callable the live execution produced.
    pub observed_invokable: Digest,
    /// Digest of the input the live execution produced.
    pub observed_input: Digest,
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "replay diverged at child {}: expected call {}({}), observed {}({})",
            self.call_index,
            self.expected_invokable,
            self.expected_input,
            self.observed_invokable,
            self.observed_input,
        )
    }
}

impl std::error::Error for ReplayError {}

/// The crate-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// A digest was not present in the active store's backend.
    #[error("resource {0} not found in store")]
    NotFound(Digest),

    /// A store operation ran outside any store scope.
    #[error("no store is active in the current scope")]
    NoActiveStore,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Packing(#[from] PackingError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Strict replay observed a call that does not match the recording.
    #[error(transparent)]
    Replay(#[from] ReplayError),

    /// A child invocation was registered but never finalized within its parent.
    #[error("{open} subinvocation(s) still open when parent finalized ({completed} completed)")]
    IncompleteSubinvocation { completed: usize, open: usize },

    /// `request_input` was called with no invocation being built.
    #[error("input requested outside of a tracked invocation")]
    InputRequestOutsideInvocation,

    /// An accessor needed a completed invocation but found a partial one.
    #[error("invocation is incomplete: {0}")]
    IncompleteInvocation(String),
}

/// Standard result alias for chronicle operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(StorageError::Io(err))
    }
}
