//! Engine configuration
//!
//! Loaded from an optional YAML file; CLI flags override individual fields.

use serde::Deserialize;
use std::path::Path;

use crate::core::NullText;
use crate::error::{TallyError, TallyResult};
use crate::types::DEFAULT_PROGRESS_EVERY;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TallyConfig {
    /// Text treated as null in addition to empty cells
    pub null_text: Option<String>,
    /// Placeholder sigil in shell templates
    pub sigil: char,
    /// Worker threads of the background pool
    pub workers: usize,
    /// Rows between progress events
    pub progress_every: usize,
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            null_text: None,
            sigil: '$',
            workers: 4,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

impl TallyConfig {
    pub fn load(path: &Path) -> TallyResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> TallyResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TallyResult<()> {
        if self.workers == 0 {
            return Err(TallyError::Config("workers must be at least 1".to_string()));
        }
        if self.progress_every == 0 {
            return Err(TallyError::Config(
                "progress_every must be at least 1".to_string(),
            ));
        }
        if self.sigil.is_whitespace() {
            return Err(TallyError::Config("sigil cannot be whitespace".to_string()));
        }
        Ok(())
    }

    pub fn null_policy(&self) -> NullText {
        NullText::new(self.null_text.clone())
    }
}
