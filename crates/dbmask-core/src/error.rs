//! Error types for blueprint construction, scheduling, and value computation.

/// Errors raised by the core anonymization logic.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The declared table dependencies contain a cycle.
    #[error("Circular dependency detected among tables: {}", tables.join(", "))]
    CircularDependency {
        /// Tables left unresolved after the topological sort.
        tables: Vec<String>,
    },

    /// A rule requested a generator kind the generator does not provide.
    #[error("Unknown generator kind '{0}'")]
    UnknownGeneratorKind(String),

    /// The generator ran out of distinct values for a unique request.
    #[error("Exhausted unique values for generator kind '{kind}'")]
    UniqueValuesExhausted {
        /// The semantic kind whose value space ran dry.
        kind: String,
    },

    /// A rule or hook referenced a column absent from the row snapshot.
    #[error("Column '{column}' not present in the fetched row")]
    MissingColumn {
        /// The missing column name.
        column: String,
    },

    /// A post-row hook failed.
    #[error("Post-row hook failed: {0}")]
    Hook(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
