//! Client identifier derived from a hardware-unique byte sequence.
//!
//! The identifier is the configured prefix followed by the id bytes in
//! reverse order, hex encoded (`nxp_` + `…`). It is computed once at startup
//! and reused for every reconnection so the broker sees a stable client.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Failed to read hardware id from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Hardware id is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("Hardware id is empty")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub prefix: String,
    /// Hex override; takes precedence over `machine_id_path`.
    pub hardware_id: Option<String>,
    pub machine_id_path: PathBuf,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            prefix: "nxp_".to_string(),
            hardware_id: None,
            machine_id_path: PathBuf::from("/etc/machine-id"),
        }
    }
}

/// Source of the raw hardware id bytes.
pub trait HardwareId {
    fn read_id(&self) -> Result<Vec<u8>, IdentityError>;
}

/// Hex string taken from configuration.
pub struct StaticId(pub String);

impl HardwareId for StaticId {
    fn read_id(&self) -> Result<Vec<u8>, IdentityError> {
        Ok(hex::decode(self.0.trim())?)
    }
}

/// Hex-encoded id file such as systemd's `/etc/machine-id`.
pub struct MachineIdFile(pub PathBuf);

impl HardwareId for MachineIdFile {
    fn read_id(&self) -> Result<Vec<u8>, IdentityError> {
        let content = std::fs::read_to_string(&self.0).map_err(|source| IdentityError::Read {
            path: self.0.clone(),
            source,
        })?;
        Ok(hex::decode(content.trim())?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn from_hardware_id(prefix: &str, id: &[u8]) -> Result<Self, IdentityError> {
        if id.is_empty() {
            return Err(IdentityError::Empty);
        }
        let reversed: Vec<u8> = id.iter().rev().copied().collect();
        Ok(Self(format!("{}{}", prefix, hex::encode(reversed))))
    }

    pub fn resolve(config: &IdentityConfig) -> Result<Self, IdentityError> {
        let id = match &config.hardware_id {
            Some(hex_id) => {
                debug!("Using configured hardware id");
                StaticId(hex_id.clone()).read_id()?
            }
            None => {
                debug!("Reading hardware id from {}", config.machine_id_path.display());
                MachineIdFile(config.machine_id_path.clone()).read_id()?
            }
        };
        let identity = Self::from_hardware_id(&config.prefix, &id)?;
        info!("Client identity: {}", identity);
        Ok(identity)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}
