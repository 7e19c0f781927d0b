use thiserror::Error;

/// Failure while resolving a watch expression against live VM memory.
///
/// These are always recovered locally: the message replaces the value of
/// the top-level watch row instead of failing the whole refresh.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    #[error("Member '{name}' couldn't be found in local or global scope '{scope}'")]
    MemberNotFound { name: String, scope: String },

    #[error("Expression couldn't be evaluated: value of '{name}' is None")]
    NullTraversal { name: String },

    #[error("Index ({index}) out of bounds: {name} array only has {len} element(s)")]
    IndexOutOfBounds {
        name: String,
        index: i64,
        len: usize,
    },

    #[error("'{name}' is not an array and cannot be indexed")]
    NotIndexable { name: String },

    #[error("'{name}' is not a composite value and cannot be traversed")]
    NotComposite { name: String },

    #[error("Array index expression '{text}' did not evaluate to an integer")]
    BadIndexExpression { text: String },

    #[error("Object referenced by '{name}' has been destroyed")]
    Destroyed { name: String },

    #[error("No data could be found for '{name}'")]
    NoData { name: String },
}

/// Failure loading or storing the persisted debugger settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}
