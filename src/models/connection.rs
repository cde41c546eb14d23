//! Connection-related data models.
//!
//! This module defines types for node and cluster configuration.

use crate::config::PoolOptions;
use serde::{Deserialize, Serialize};

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Driver name reported by handles of this type.
    pub fn driver_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgres",
            Self::MySQL => "mysql",
            Self::SQLite => "sqlite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Role of a node inside a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Writer,
    Reader,
}

impl NodeRole {
    pub fn is_writer(&self) -> bool {
        matches!(self, Self::Writer)
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Writer => write!(f, "writer"),
            Self::Reader => write!(f, "reader"),
        }
    }
}

/// Configuration for a single database node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Name of the cluster this node belongs to.
    pub cluster: String,
    pub role: NodeRole,
    pub db_type: DatabaseType,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub connection_string: String,
    /// Database name extracted from connection URL.
    pub database: Option<String>,
    #[serde(default)]
    pub pool_options: PoolOptions,
}

impl NodeConfig {
    /// Create a new node configuration.
    pub fn new(
        cluster: impl Into<String>,
        role: NodeRole,
        connection_string: impl Into<String>,
        database: Option<String>,
        pool_options: PoolOptions,
    ) -> Result<Self, NodeConfigError> {
        let cluster = cluster.into();
        let connection_string = connection_string.into();

        if cluster.is_empty() {
            return Err(NodeConfigError::EmptyName);
        }
        if !cluster
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(NodeConfigError::InvalidName(cluster));
        }

        let db_type = DatabaseType::from_connection_string(&connection_string)
            .ok_or_else(|| NodeConfigError::UnknownDatabaseType(connection_string.clone()))?;

        Ok(Self {
            cluster,
            role,
            db_type,
            connection_string,
            database,
            pool_options,
        })
    }

    /// Readers are opened read-only where the driver supports it.
    pub fn writable(&self) -> bool {
        self.role.is_writer()
    }

    /// Get a display-safe version of the connection string (credentials masked).
    pub fn masked_connection_string(&self) -> String {
        if let Some(at_pos) = self.connection_string.find('@') {
            if let Some(colon_pos) = self.connection_string[..at_pos].rfind(':') {
                let prefix = &self.connection_string[..colon_pos + 1];
                let suffix = &self.connection_string[at_pos..];
                return format!("{}****{}", prefix, suffix);
            }
        }
        self.connection_string.clone()
    }
}

/// Errors that can occur when creating a node configuration.
#[derive(Debug, thiserror::Error)]
pub enum NodeConfigError {
    #[error("Cluster name cannot be empty")]
    EmptyName,

    #[error("Cluster name contains invalid characters: {0}")]
    InvalidName(String),

    /// Could not determine database type from connection string
    #[error("Unknown database type in connection string: {0}")]
    UnknownDatabaseType(String),
}

/// A writer plus its readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    pub writer: NodeConfig,
    #[serde(default)]
    pub readers: Vec<NodeConfig>,
}

impl ClusterConfig {
    pub fn db_type(&self) -> DatabaseType {
        self.writer.db_type
    }
}
