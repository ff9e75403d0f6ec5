//! Node configuration.

use std::time::Duration;

/// Lease sweeping configuration.
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    /// Age past which a held lock puts its owner under liveness watch.
    pub expiry: Duration,
    /// How often the sweep runs.
    pub sweep_interval: Duration,
}

impl LeaseConfig {
    /// Lease configuration with the sweep running at twice the expiry.
    pub fn with_expiry(expiry: Duration) -> Self {
        Self {
            expiry,
            sweep_interval: expiry * 2,
        }
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self::with_expiry(Duration::from_secs(30))
    }
}

/// Main lock manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Node ID (must be unique within cluster).
    pub node_id: Option<String>,
    /// Instance name, used to address this manager in logs and errors.
    pub name: String,
    /// Lease configuration.
    pub lease: LeaseConfig,
    /// Log level.
    pub log_level: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            name: "lockmesh".to_string(),
            lease: LeaseConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl ManagerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("LOCKMESH_NAME") {
            config.name = name;
        }

        if let Ok(id) = std::env::var("LOCKMESH_NODE_ID") {
            config.node_id = Some(id);
        }

        if let Ok(secs) = std::env::var("LOCKMESH_LEASE_EXPIRY_SECS") {
            if let Ok(secs) = secs.parse() {
                config.lease = LeaseConfig::with_expiry(Duration::from_secs(secs));
            }
        }

        if let Ok(secs) = std::env::var("LOCKMESH_SWEEP_INTERVAL_SECS") {
            if let Ok(secs) = secs.parse() {
                config.lease.sweep_interval = Duration::from_secs(secs);
            }
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("Instance name cannot be empty".to_string());
        }

        if self.lease.expiry.is_zero() {
            return Err("Lease expiry cannot be zero".to_string());
        }

        if self.lease.sweep_interval.is_zero() {
            return Err("Sweep interval cannot be zero".to_string());
        }

        Ok(())
    }
}
