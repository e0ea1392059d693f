use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    // ========================================
    // Connection pool / physical link
    // ========================================
    #[error("The connection pool is full ({0} connections)")]
    PoolExhausted(usize),

    #[error("Pool error: {0}")]
    Pool(String),

    #[error("Connection error: {0}")]
    Connection(String),

    // ========================================
    // Statements and cursors
    // ========================================
    #[error("Query error: {0}")]
    Query(String),

    #[error("Interface error: {0}")]
    Interface(String),

    // ========================================
    // Test cursors
    // ========================================
    #[error("Could not acquire the test cursor lock within {0:?}")]
    LockTimeout(Duration),

    #[error("Illegal cursor nesting: {0}")]
    IllegalNesting(String),

    // ========================================
    // Registry
    // ========================================
    #[error("Failed to load registry for database '{db}': {source}")]
    RegistryLoad {
        db: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Invalid model definition: {0}")]
    Model(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Constraint failure: {0}")]
    Constraint(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Model hook failed: {0}")]
    Hook(#[from] anyhow::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    /// Operational errors that the caller may retry by itself (nothing here retries them).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted(_) | Self::Connection(_) | Self::LockTimeout(_)
        )
    }

    pub(crate) fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }
}

impl From<sqlparser::parser::ParserError> for DbError {
    fn from(err: sqlparser::parser::ParserError) -> Self {
        Self::Query(format!("syntax error: {err}"))
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DbError::PoolExhausted(4).is_transient());
        assert!(DbError::LockTimeout(Duration::from_secs(1)).is_transient());
        assert!(!DbError::Query("bad".into()).is_transient());
        assert!(!DbError::Interface("closed".into()).is_transient());
    }

    #[test]
    fn test_registry_load_keeps_source() {
        let err = DbError::RegistryLoad {
            db: "prod".into(),
            source: Box::new(DbError::Model("unknown comodel".into())),
        };
        let text = err.to_string();
        assert!(text.contains("prod"));
        assert!(text.contains("unknown comodel"));
    }
}
