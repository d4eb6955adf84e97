//! Compliance rules
//!
//! Every rule is a pure predicate over one instance and the provider data it
//! declares it needs. Rules never see each other's verdicts, so a [`RuleSet`]
//! can be extended by pushing another rule and evaluated in any order.

use crate::model::{Instance, NAME_TAG, Volume};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Provider data a rule depends on beyond the instance record itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Attached volumes with root identity resolved
    Volumes,
    /// Newest available image of the same kind as the instance's image
    LatestImage,
}

/// Lookup results available to a rule for one instance.
///
/// Fields a rule did not declare through [`Rule::requires`] may be empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct Facts<'a> {
    pub volumes: &'a [Volume],
    pub latest_image_id: Option<&'a str>,
}

impl<'a> Facts<'a> {
    pub fn with_volumes(volumes: &'a [Volume]) -> Self {
        Self {
            volumes,
            latest_image_id: None,
        }
    }

    pub fn with_latest_image(latest_image_id: &'a str) -> Self {
        Self {
            volumes: &[],
            latest_image_id: Some(latest_image_id),
        }
    }
}

/// A named compliance predicate
pub trait Rule: Send + Sync {
    /// Stable identifier shown in reports
    fn name(&self) -> &str;

    /// Lookup the verdict depends on, if any.
    ///
    /// When that lookup did not succeed for an instance the rule fails closed
    /// and is not evaluated.
    fn requires(&self) -> Option<Lookup>;

    fn evaluate(&self, instance: &Instance, facts: &Facts<'_>) -> bool;
}

/// Passes iff some tag has key `Name` and a non-empty value
#[derive(Debug, Clone, Copy, Default)]
pub struct NameTagPresent;

impl Rule for NameTagPresent {
    fn name(&self) -> &str {
        RuleId::NameTagSet.as_str()
    }

    fn requires(&self) -> Option<Lookup> {
        None
    }

    fn evaluate(&self, instance: &Instance, _facts: &Facts<'_>) -> bool {
        instance
            .tags()
            .iter()
            .any(|t| t.key() == NAME_TAG && t.has_meaningful_value())
    }
}

/// Passes iff every attached volume is encrypted, optionally exempting the root volume
#[derive(Debug, Clone, Copy)]
pub struct AllVolumesEncrypted {
    check_root_volume: bool,
}

impl AllVolumesEncrypted {
    pub fn new(check_root_volume: bool) -> Self {
        Self { check_root_volume }
    }

    /// Any unencrypted volume is a violation
    pub fn root_inclusive() -> Self {
        Self::new(true)
    }

    /// An unencrypted root volume is tolerated when it is the only unencrypted volume
    pub fn root_exempt() -> Self {
        Self::new(false)
    }

}

impl Rule for AllVolumesEncrypted {
    fn name(&self) -> &str {
        if self.check_root_volume {
            RuleId::AllVolumesEncrypted.as_str()
        } else {
            RuleId::AllNonRootVolumesEncrypted.as_str()
        }
    }

    fn requires(&self) -> Option<Lookup> {
        Some(Lookup::Volumes)
    }

    fn evaluate(&self, _instance: &Instance, facts: &Facts<'_>) -> bool {
        let unencrypted: Vec<&Volume> =
            facts.volumes.iter().filter(|v| !v.is_encrypted()).collect();

        match unencrypted.as_slice() {
            [] => true,
            _ if self.check_root_volume => false,
            [only] => only.is_root(),
            _ => false,
        }
    }
}

/// Passes iff the instance has no public IPv4 address
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPublicIp;

impl Rule for NoPublicIp {
    fn name(&self) -> &str {
        RuleId::NoPublicIp.as_str()
    }

    fn requires(&self) -> Option<Lookup> {
        None
    }

    fn evaluate(&self, instance: &Instance, _facts: &Facts<'_>) -> bool {
        instance.public_ip().is_none_or(str::is_empty)
    }
}

/// Passes iff the instance runs the newest available image of its kind.
///
/// "Same kind" means same owner, architecture, virtualization type, root
/// device type and root volume type. An instance without an image ID fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageUpToDate;

impl Rule for ImageUpToDate {
    fn name(&self) -> &str {
        RuleId::ImageUpToDate.as_str()
    }

    fn requires(&self) -> Option<Lookup> {
        Some(Lookup::LatestImage)
    }

    fn evaluate(&self, instance: &Instance, facts: &Facts<'_>) -> bool {
        instance
            .image_id()
            .is_some_and(|id| facts.latest_image_id == Some(id))
    }
}

/// Identifiers of the built-in rules, in standard registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleId {
    NameTagSet,
    AllVolumesEncrypted,
    AllNonRootVolumesEncrypted,
    NoPublicIp,
    ImageUpToDate,
}

impl RuleId {
    pub const ALL: [RuleId; 5] = [
        RuleId::NameTagSet,
        RuleId::AllVolumesEncrypted,
        RuleId::AllNonRootVolumesEncrypted,
        RuleId::NoPublicIp,
        RuleId::ImageUpToDate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::NameTagSet => "name_tag_set",
            RuleId::AllVolumesEncrypted => "all_volumes_encrypted",
            RuleId::AllNonRootVolumesEncrypted => "all_non_root_volumes_encrypted",
            RuleId::NoPublicIp => "no_public_ip",
            RuleId::ImageUpToDate => "image_up_to_date",
        }
    }

    /// Instantiate the rule this identifier names
    pub fn build(&self) -> Box<dyn Rule> {
        match self {
            RuleId::NameTagSet => Box::new(NameTagPresent),
            RuleId::AllVolumesEncrypted => Box::new(AllVolumesEncrypted::root_inclusive()),
            RuleId::AllNonRootVolumesEncrypted => Box::new(AllVolumesEncrypted::root_exempt()),
            RuleId::NoPublicIp => Box::new(NoPublicIp),
            RuleId::ImageUpToDate => Box::new(ImageUpToDate),
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleId {
    type Err = RuleSetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| RuleSetError::Unknown(s.to_string()))
    }
}

/// Rule registration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleSetError {
    #[error("rule '{0}' is registered twice")]
    Duplicate(String),

    #[error("unknown rule '{0}' (expected one of: {known})", known = known_rule_names())]
    Unknown(String),
}

fn known_rule_names() -> String {
    RuleId::ALL.map(|id| id.as_str()).join(", ")
}

/// Ordered collection of rules applied identically to every instance
#[derive(Default)]
pub struct RuleSet {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in rules in standard order
    pub fn standard() -> Self {
        Self {
            rules: RuleId::ALL.iter().map(RuleId::build).collect(),
        }
    }

    /// Build a rule set from identifiers, preserving their order
    pub fn from_ids(ids: &[RuleId]) -> Result<Self, RuleSetError> {
        let mut set = Self::new();
        for id in ids {
            set.push(id.build())?;
        }
        Ok(set)
    }

    /// Register a rule after the existing ones
    pub fn push(&mut self, rule: Box<dyn Rule>) -> Result<(), RuleSetError> {
        if self.rules.iter().any(|r| r.name() == rule.name()) {
            return Err(RuleSetError::Duplicate(rule.name().to_string()));
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Rule> {
        self.rules.iter().map(|r| r.as_ref())
    }

    /// True if any registered rule depends on `lookup`
    pub fn requires(&self, lookup: Lookup) -> bool {
        self.iter().any(|r| r.requires() == Some(lookup))
    }

    pub fn names(&self) -> Vec<&str> {
        self.iter().map(|r| r.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
