//! ec2-audit-core - Compliance rule engine for EC2 inventories
//!
//! This crate holds everything that decides compliance, without any AWS SDK
//! dependencies so it can be tested against in-memory inventories.
//!
//! ## Modules
//!
//! - [`model`]: Instances, tags, volumes and image data as seen in one snapshot
//! - [`rules`]: Named compliance predicates and the ordered [`RuleSet`]
//! - [`engine`]: Pure evaluation plus the provider-driven [`Auditor`]
//! - [`report`]: Per-instance verdicts and the run summary

pub mod engine;
pub mod model;
pub mod report;
pub mod rules;

// Re-export commonly used types
pub use engine::{AuditOptions, Auditor, InventoryProvider, Snapshot, evaluate};
pub use model::{AuditTarget, ImageData, Instance, InstanceState, Tag, Volume, VolumeData};
pub use report::{AuditRun, Report, RunStatus, Summary, Verdict};
pub use rules::{
    AllVolumesEncrypted, Facts, ImageUpToDate, Lookup, NameTagPresent, NoPublicIp, Rule, RuleId,
    RuleSet, RuleSetError,
};
