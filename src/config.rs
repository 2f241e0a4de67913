//! Engine configuration
//!
//! Selects the emulated dialect and version, the thread-safety mode and the
//! isolation level recorded on new transactions.

use crate::database::transaction::IsolationLevel;
use crate::dialect::{Dialect, DialectKind};
use crate::error::{Result, SqlError};
use serde::{Deserialize, Serialize};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Emulated engine family
    pub dialect: DialectKind,

    /// Engine version; `None` means the family's default
    #[serde(default)]
    pub version: Option<u32>,

    /// Serialize mutations and transaction boundaries on the database-wide lock
    ///
    /// The catalog lock is always taken; with `thread_safe = false` the
    /// database simply logs that callers promised single-threaded use.
    #[serde(default = "default_thread_safe")]
    pub thread_safe: bool,

    /// Isolation level recorded on transactions started without one
    #[serde(default)]
    pub default_isolation: IsolationLevel,
}

fn default_thread_safe() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::mysql()
    }
}

impl EngineConfig {
    pub fn new(dialect: DialectKind) -> Self {
        Self {
            dialect,
            version: None,
            thread_safe: true,
            default_isolation: IsolationLevel::default(),
        }
    }

    pub fn mysql() -> Self {
        Self::new(DialectKind::MySql)
    }

    pub fn postgres() -> Self {
        Self::new(DialectKind::PostgreSql)
    }

    pub fn oracle() -> Self {
        Self::new(DialectKind::Oracle)
    }

    pub fn db2() -> Self {
        Self::new(DialectKind::Db2)
    }

    pub fn sqlite() -> Self {
        Self::new(DialectKind::Sqlite)
    }

    pub fn sql_server() -> Self {
        Self::new(DialectKind::SqlServer)
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn thread_safe(mut self, thread_safe: bool) -> Self {
        self.thread_safe = thread_safe;
        self
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.default_isolation = isolation;
        self
    }

    /// Load a configuration from JSON
    ///
    /// # Example
    /// ```ignore
    /// let cfg = EngineConfig::from_json(r#"{"dialect":"postgresql","version":15}"#)?;
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| SqlError::InvalidArgument(format!("invalid engine config: {}", e)))
    }

    pub fn effective_version(&self) -> u32 {
        self.version
            .unwrap_or_else(|| self.dialect.default_version())
    }

    pub fn build_dialect(&self) -> Dialect {
        Dialect::new(self.dialect, self.effective_version())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_version_resolution() {
        let cfg = EngineConfig::postgres();
        assert_eq!(cfg.effective_version(), 16);
        assert_eq!(cfg.clone().with_version(12).effective_version(), 12);
        assert!(cfg.thread_safe);
    }

    #[test]
    fn test_from_json() {
        let cfg = EngineConfig::from_json(r#"{"dialect":"oracle","version":12}"#).unwrap();
        assert_eq!(cfg.dialect, DialectKind::Oracle);
        assert_eq!(cfg.version, Some(12));
        assert!(cfg.thread_safe);
        assert_eq!(cfg.default_isolation, IsolationLevel::ReadCommitted);

        assert!(EngineConfig::from_json("{").is_err());
    }
}
