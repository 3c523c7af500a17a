use crate::error::DedupError;

/// `analyze`'s configuration (§4.3 "Public contract").
#[derive(Debug, Clone)]
pub struct DuplicateConfig {
    pub threshold: f64,
    pub use_exact: bool,
    pub use_fuzzy: bool,
    pub merge_overlapping: bool,
    pub min_confidence: f64,
    pub word_based_use_stopwords: bool,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            use_exact: true,
            use_fuzzy: true,
            merge_overlapping: true,
            min_confidence: 0.0,
            word_based_use_stopwords: true,
        }
    }
}

impl DuplicateConfig {
    pub fn validate(&self) -> Result<(), DedupError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(DedupError::ConfigInvalid(format!(
                "threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(DedupError::ConfigInvalid(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(DuplicateConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let config = DuplicateConfig {
            threshold: 1.5,
            ..DuplicateConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_negative_min_confidence() {
        let config = DuplicateConfig {
            min_confidence: -0.1,
            ..DuplicateConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
