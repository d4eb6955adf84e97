//! Resource model for one inventory snapshot
//!
//! Instances and volumes are built once from provider data and never mutated.
//! Malformed provider data (tags without keys, volumes without an encryption
//! flag, unresolvable root devices) is normalized here so rules never have to
//! deal with it.

use serde::Serialize;
use std::fmt;

/// Tag key that carries an instance's human-readable name
pub const NAME_TAG: &str = "Name";

/// A key/value metadata pair attached to an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    key: String,
    value: Option<String>,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: Option<String>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Build a tag from raw provider fields.
    ///
    /// Returns `None` for a tag without a key. A missing value is kept as
    /// absent rather than coerced to an empty string.
    pub fn from_raw(key: Option<&str>, value: Option<&str>) -> Option<Self> {
        key.map(|k| Self::new(k, value.map(str::to_string)))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// True if the value is present and non-empty
    pub fn has_meaningful_value(&self) -> bool {
        self.value.as_deref().is_some_and(|v| !v.is_empty())
    }
}

/// Lifecycle state reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Stopping,
    Stopped,
    Terminated,
    Unknown,
}

impl InstanceState {
    /// Parse a provider state name, mapping anything unrecognized to `Unknown`
    pub fn from_name(name: &str) -> Self {
        match name {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "shutting-down" => Self::ShuttingDown,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "terminated" => Self::Terminated,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Terminated => "terminated",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fleet member under audit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    id: String,
    state: InstanceState,
    tags: Vec<Tag>,
    root_device_name: Option<String>,
    public_ip: Option<String>,
    image_id: Option<String>,
}

impl Instance {
    /// Start building an instance with the given identifier
    pub fn builder(id: impl Into<String>) -> InstanceBuilder {
        InstanceBuilder {
            instance: Instance {
                id: id.into(),
                state: InstanceState::Running,
                tags: Vec::new(),
                root_device_name: None,
                public_ip: None,
                image_id: None,
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Device name of the root volume (e.g. `/dev/xvda`), if the provider knows it
    pub fn root_device_name(&self) -> Option<&str> {
        self.root_device_name.as_deref()
    }

    pub fn public_ip(&self) -> Option<&str> {
        self.public_ip.as_deref()
    }

    pub fn image_id(&self) -> Option<&str> {
        self.image_id.as_deref()
    }

    /// Value of the first tag with this key that carries a meaningful value.
    ///
    /// Keys may repeat in provider data; the scan does not let a later
    /// empty duplicate hide an earlier non-empty one.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key() == key && t.has_meaningful_value())
            .and_then(Tag::value)
    }

    /// Value of the `Name` tag
    pub fn name(&self) -> Option<&str> {
        self.tag(NAME_TAG)
    }
}

/// Builder for [`Instance`]
#[derive(Debug, Clone)]
pub struct InstanceBuilder {
    instance: Instance,
}

impl InstanceBuilder {
    pub fn state(mut self, state: InstanceState) -> Self {
        self.instance.state = state;
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.instance.tags.push(Tag::new(key, Some(value.into())));
        self
    }

    /// Append an already-constructed tag (e.g. one with no value)
    pub fn push_tag(mut self, tag: Tag) -> Self {
        self.instance.tags.push(tag);
        self
    }

    pub fn tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.instance.tags.extend(tags);
        self
    }

    pub fn root_device_name(mut self, name: impl Into<String>) -> Self {
        self.instance.root_device_name = Some(name.into());
        self
    }

    pub fn public_ip(mut self, ip: impl Into<String>) -> Self {
        self.instance.public_ip = Some(ip.into());
        self
    }

    pub fn image_id(mut self, image_id: impl Into<String>) -> Self {
        self.instance.image_id = Some(image_id.into());
        self
    }

    pub fn build(self) -> Instance {
        self.instance
    }
}

/// A block-storage device attached to an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Volume {
    id: String,
    encrypted: bool,
    is_root: bool,
}

impl Volume {
    pub fn new(id: impl Into<String>, encrypted: bool, is_root: bool) -> Self {
        Self {
            id: id.into(),
            encrypted,
            is_root,
        }
    }

    /// Build a volume from its attachment record.
    ///
    /// The volume is the root device only when both the attachment device and
    /// the instance's root device name are known and equal. A missing
    /// encryption flag counts as unencrypted.
    pub fn from_attachment(
        id: Option<&str>,
        encrypted: Option<bool>,
        device: Option<&str>,
        root_device_name: Option<&str>,
    ) -> Self {
        let is_root = matches!((device, root_device_name), (Some(d), Some(r)) if d == r);
        Self::new(id.unwrap_or_default(), encrypted.unwrap_or(false), is_root)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }
}

/// Volume information for one instance, as far as the provider could supply it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeData {
    /// Lookup succeeded; may be empty for instances without attachments
    Known(Vec<Volume>),
    /// Lookup failed or timed out
    Unavailable { reason: String },
}

impl VolumeData {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Volumes, or `None` when the lookup failed
    pub fn volumes(&self) -> Option<&[Volume]> {
        match self {
            Self::Known(v) => Some(v),
            Self::Unavailable { .. } => None,
        }
    }

    /// The root volume, if one was identified
    pub fn root(&self) -> Option<&Volume> {
        self.volumes()?.iter().find(|v| v.is_root())
    }

    /// Unencrypted volumes in attachment order (empty when unavailable)
    pub fn unencrypted(&self) -> impl Iterator<Item = &Volume> {
        self.volumes()
            .unwrap_or_default()
            .iter()
            .filter(|v| !v.is_encrypted())
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Known(_) => None,
            Self::Unavailable { reason } => Some(reason),
        }
    }
}

/// Newest available image of the same kind as an instance's image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageData {
    /// No rule in the run needs image data
    NotRequested,
    Known { latest_image_id: String },
    /// Lookup failed, timed out, or the instance has no image ID
    Unavailable { reason: String },
}

impl ImageData {
    pub fn known(latest_image_id: impl Into<String>) -> Self {
        Self::Known {
            latest_image_id: latest_image_id.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn latest_image_id(&self) -> Option<&str> {
        match self {
            Self::Known { latest_image_id } => Some(latest_image_id),
            Self::NotRequested | Self::Unavailable { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Unavailable { reason } => Some(reason),
            Self::NotRequested | Self::Known { .. } => None,
        }
    }
}

/// One snapshot entry: an instance plus whatever lookup data was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditTarget {
    pub instance: Instance,
    pub volumes: VolumeData,
    pub image: ImageData,
}

impl AuditTarget {
    pub fn new(instance: Instance, volumes: VolumeData) -> Self {
        Self {
            instance,
            volumes,
            image: ImageData::NotRequested,
        }
    }

    pub fn with_image(mut self, image: ImageData) -> Self {
        self.image = image;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_without_key_is_dropped() {
        assert!(Tag::from_raw(None, Some("web-1")).is_none());
    }

    #[test]
    fn missing_tag_value_is_not_empty_string() {
        let tag = Tag::from_raw(Some("Name"), None).unwrap();
        assert_eq!(tag.value(), None);
        assert!(!tag.has_meaningful_value());

        let empty = Tag::from_raw(Some("Name"), Some("")).unwrap();
        assert_eq!(empty.value(), Some(""));
        assert!(!empty.has_meaningful_value());
    }

    #[test]
    fn first_meaningful_duplicate_wins() {
        let instance = Instance::builder("i-1")
            .tag("Name", "")
            .tag("Name", "web-1")
            .tag("Name", "web-2")
            .build();
        assert_eq!(instance.name(), Some("web-1"));
    }

    #[test]
    fn tag_lookup_is_case_sensitive() {
        let instance = Instance::builder("i-1").tag("name", "web-1").build();
        assert_eq!(instance.name(), None);
    }

    #[test]
    fn state_parsing() {
        assert_eq!(InstanceState::from_name("running"), InstanceState::Running);
        assert_eq!(
            InstanceState::from_name("shutting-down"),
            InstanceState::ShuttingDown
        );
        assert_eq!(
            InstanceState::from_name("hibernating"),
            InstanceState::Unknown
        );
        assert_eq!(InstanceState::Stopped.to_string(), "stopped");
    }

    #[test]
    fn root_resolved_by_device_name() {
        let root = Volume::from_attachment(
            Some("vol-1"),
            Some(false),
            Some("/dev/xvda"),
            Some("/dev/xvda"),
        );
        let data = Volume::from_attachment(
            Some("vol-2"),
            Some(true),
            Some("/dev/sdf"),
            Some("/dev/xvda"),
        );
        assert!(root.is_root());
        assert!(!data.is_root());
    }

    #[test]
    fn unresolvable_root_is_not_an_error() {
        let v = Volume::from_attachment(Some("vol-1"), Some(true), Some("/dev/xvda"), None);
        assert!(!v.is_root());
        let v = Volume::from_attachment(Some("vol-1"), Some(true), None, Some("/dev/xvda"));
        assert!(!v.is_root());
    }

    #[test]
    fn missing_encryption_flag_counts_as_unencrypted() {
        let v = Volume::from_attachment(Some("vol-1"), None, None, None);
        assert!(!v.is_encrypted());
    }

    #[test]
    fn volume_data_accessors() {
        let data = VolumeData::Known(vec![
            Volume::new("vol-root", true, true),
            Volume::new("vol-data", false, false),
        ]);
        assert_eq!(data.root().map(Volume::id), Some("vol-root"));
        let unencrypted: Vec<_> = data.unencrypted().map(Volume::id).collect();
        assert_eq!(unencrypted, vec!["vol-data"]);
        assert!(data.failure_reason().is_none());

        let failed = VolumeData::unavailable("timed out");
        assert!(failed.volumes().is_none());
        assert!(failed.root().is_none());
        assert_eq!(failed.unencrypted().count(), 0);
        assert_eq!(failed.failure_reason(), Some("timed out"));
    }

    #[test]
    fn zero_volumes_is_valid() {
        let data = VolumeData::Known(Vec::new());
        assert!(data.root().is_none());
        assert_eq!(data.volumes().map(<[Volume]>::len), Some(0));
    }

    #[test]
    fn image_data_accessors() {
        assert_eq!(ImageData::known("ami-2").latest_image_id(), Some("ami-2"));
        assert!(ImageData::known("ami-2").failure_reason().is_none());

        let failed = ImageData::unavailable("InvalidAMIID.NotFound");
        assert!(failed.latest_image_id().is_none());
        assert_eq!(failed.failure_reason(), Some("InvalidAMIID.NotFound"));

        assert!(ImageData::NotRequested.latest_image_id().is_none());
        assert!(ImageData::NotRequested.failure_reason().is_none());
    }
}
