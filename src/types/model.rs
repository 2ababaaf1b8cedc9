//! Model selection ("provider:model_id").

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConvoyError;

/// Reference to a model hosted by a named provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider: String,
    pub model_id: String,
}

impl ModelRef {
    pub fn new(provider: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
        }
    }

    /// Parse "provider:model_id". Everything after the first colon is the model id.
    pub fn parse(s: &str) -> Result<Self, ConvoyError> {
        let (provider, model_id) = s.split_once(':').ok_or_else(|| {
            ConvoyError::InvalidArgument(format!(
                "Invalid model selector '{s}': expected 'provider:model_id'"
            ))
        })?;
        if provider.is_empty() || model_id.is_empty() {
            return Err(ConvoyError::InvalidArgument(format!(
                "Invalid model selector '{s}': provider and model id must be non-empty"
            )));
        }
        Ok(Self::new(provider, model_id))
    }
}

impl FromStr for ModelRef {
    type Err = ConvoyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_colons_in_model_id() {
        let model = ModelRef::parse("openrouter:google/gemini-2.5-pro:free").unwrap();
        assert_eq!(model.provider, "openrouter");
        assert_eq!(model.model_id, "google/gemini-2.5-pro:free");
        assert_eq!(model.to_string(), "openrouter:google/gemini-2.5-pro:free");
    }

    #[test]
    fn parse_rejects_missing_separator() {
        assert!(matches!(
            "gpt-4o".parse::<ModelRef>(),
            Err(ConvoyError::InvalidArgument(_))
        ));
        assert!(ModelRef::parse("openai:").is_err());
    }
}
