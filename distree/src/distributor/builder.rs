//! Builder for plan configuration
use crate::{
    error::{CommError, Result},
    helpers::DEFAULT_PARALLEL_THRESHOLD,
    traits::communication::{Tag, MAX_USER_TAG},
};

use super::types::{CountDiscovery, DistributorBuilder, DistributorConfig};

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            discovery: CountDiscovery::default(),
            tag: 0,
            check_consistency: false,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

impl DistributorBuilder {
    /// Initialise an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the count discovery handshake, dense by default
    pub fn discovery(mut self, discovery: CountDiscovery) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Set the message tag, must lie in [0, MAX_USER_TAG]
    pub fn tag(mut self, tag: Tag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Enable the global send/receive consistency check
    pub fn check_consistency(mut self, check: bool) -> Self {
        self.check_consistency = Some(check);
        self
    }

    /// Number of items above which grouping and packing run in parallel
    pub fn parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = Some(threshold);
        self
    }

    /// Validate settings and produce a configuration
    pub fn build(self) -> Result<DistributorConfig> {
        let default = DistributorConfig::default();

        let tag = self.tag.unwrap_or(default.tag);
        if !(0..=MAX_USER_TAG).contains(&tag) {
            return Err(CommError::TagOutOfRange {
                tag,
                max: MAX_USER_TAG,
            });
        }

        let parallel_threshold = self
            .parallel_threshold
            .unwrap_or(default.parallel_threshold);
        if parallel_threshold == 0 {
            return Err(CommError::InvalidConfig(
                "parallel threshold must be positive".to_string(),
            ));
        }

        Ok(DistributorConfig {
            discovery: self.discovery.unwrap_or(default.discovery),
            tag,
            check_consistency: self.check_consistency.unwrap_or(default.check_consistency),
            parallel_threshold,
        })
    }
}
