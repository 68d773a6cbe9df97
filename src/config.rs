//! Validator configuration

use crate::constants::MAX_BLOCK_SIZE;
use crate::error::{ConsensusError, Result};
use serde::{Deserialize, Serialize};

/// Tunables for [`crate::block::BlockValidator`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Reject a block whose coinbase claims a height more than this far above the
    /// known tip, before any expensive check. `None` disables the shortcut.
    pub max_height_lead: Option<u64>,
    /// Verify inputs on one blocking worker each; otherwise sequentially on one worker
    pub parallel_scripts: bool,
    /// Largest accepted serialized block, in bytes
    pub max_block_size: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_height_lead: Some(5000),
            parallel_scripts: true,
            max_block_size: MAX_BLOCK_SIZE,
        }
    }
}

impl ValidatorConfig {
    /// Load from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ValidatorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_block_size == 0 {
            return Err(ConsensusError::InvalidArgument(
                "max_block_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
