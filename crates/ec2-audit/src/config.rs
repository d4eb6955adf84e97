//! Run configuration
//!
//! Built from command-line arguments in `main`. Only the audit settings reach
//! the engine; AWS and output settings configure the collaborators around it.

use crate::defaults::{DEFAULT_CONCURRENCY, DEFAULT_LOOKUP_TIMEOUT_SECS, DEFAULT_REGION};
use crate::output::OutputFormat;
use ec2_audit_core::{AuditOptions, RuleId, RuleSet, RuleSetError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// region is empty
    #[error("region cannot be empty")]
    EmptyRegion,

    /// concurrency is zero
    #[error("concurrency must be at least 1")]
    InvalidConcurrency,

    /// lookup timeout is zero
    #[error("lookup timeout must be greater than 0")]
    InvalidLookupTimeout,

    /// no rules selected
    #[error("at least one rule must be selected")]
    NoRules,

    /// rule list could not be registered
    #[error(transparent)]
    Rules(#[from] RuleSetError),
}

/// AWS session scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsConfig {
    /// AWS region
    pub region: String,
    /// AWS profile name (overrides default credential resolution)
    pub aws_profile: Option<String>,
}

/// Engine and provider settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditSettings {
    /// Rules to apply, in report order
    pub rules: Vec<RuleId>,
    /// Provider lookups in flight at once
    pub concurrency: usize,
    /// Timeout of one volume or image lookup
    pub lookup_timeout: Duration,
}

/// Report sink settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    pub format: OutputFormat,
    /// Also write the JSON document here
    pub output: Option<PathBuf>,
    /// Surface provider responses in the log
    pub verbose: bool,
}

/// Configuration for one audit run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditConfig {
    pub aws: AwsConfig,
    pub audit: AuditSettings,
    pub output: OutputConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            aws: AwsConfig {
                region: DEFAULT_REGION.to_string(),
                aws_profile: None,
            },
            audit: AuditSettings {
                rules: RuleId::ALL.to_vec(),
                concurrency: DEFAULT_CONCURRENCY,
                lookup_timeout: Duration::from_secs(DEFAULT_LOOKUP_TIMEOUT_SECS),
            },
            output: OutputConfig {
                format: OutputFormat::default(),
                output: None,
                verbose: false,
            },
        }
    }
}

impl AuditConfig {
    /// Check the configuration before any AWS call is made
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.aws.region.trim().is_empty() {
            return Err(ConfigError::EmptyRegion);
        }
        if self.audit.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        if self.audit.lookup_timeout.is_zero() {
            return Err(ConfigError::InvalidLookupTimeout);
        }
        self.rule_set()?;
        Ok(())
    }

    /// Instantiate the selected rules in order
    pub fn rule_set(&self) -> Result<RuleSet, ConfigError> {
        if self.audit.rules.is_empty() {
            return Err(ConfigError::NoRules);
        }
        Ok(RuleSet::from_ids(&self.audit.rules)?)
    }

    pub fn audit_options(&self) -> AuditOptions {
        AuditOptions {
            concurrency: self.audit.concurrency,
        }
    }
}
