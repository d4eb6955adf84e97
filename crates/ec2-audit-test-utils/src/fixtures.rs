//! Fixture builders and an in-memory inventory provider

use anyhow::{Result, bail};
use ec2_audit_core::{Instance, InventoryProvider, Volume};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Root device name used by fixture instances
pub const ROOT_DEVICE: &str = "/dev/xvda";

/// Image fixture instances are launched from
pub const FIXTURE_IMAGE: &str = "ami-0fixture";

/// A running instance with a `Name` tag, a known root device and [`FIXTURE_IMAGE`]
pub fn named_instance(id: &str, name: &str) -> Instance {
    Instance::builder(id)
        .tag("Name", name)
        .root_device_name(ROOT_DEVICE)
        .image_id(FIXTURE_IMAGE)
        .build()
}

pub fn root_volume(id: &str, encrypted: bool) -> Volume {
    Volume::new(id, encrypted, true)
}

pub fn data_volume(id: &str, encrypted: bool) -> Volume {
    Volume::new(id, encrypted, false)
}

enum Script {
    Volumes(Vec<Volume>),
    Fail(String),
}

/// Inventory provider that serves canned responses.
///
/// Instances without scripted volumes report no attachments, and images
/// without a scripted successor are their own latest image. Per-instance
/// delays let tests make lookups complete out of order.
#[derive(Default)]
pub struct ScriptedInventory {
    instances: Vec<Instance>,
    scripts: HashMap<String, Script>,
    delays: HashMap<String, Duration>,
    latest_images: HashMap<String, Result<String, String>>,
    listing_error: Option<String>,
    lookups: AtomicUsize,
    image_lookups: AtomicUsize,
}

impl ScriptedInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instance(mut self, instance: Instance, volumes: Vec<Volume>) -> Self {
        self.scripts
            .insert(instance.id().to_string(), Script::Volumes(volumes));
        self.instances.push(instance);
        self
    }

    /// Add an instance whose volume lookup fails with `message`
    pub fn with_failing_instance(mut self, instance: Instance, message: &str) -> Self {
        self.scripts
            .insert(instance.id().to_string(), Script::Fail(message.to_string()));
        self.instances.push(instance);
        self
    }

    pub fn with_delay(mut self, instance_id: &str, delay: Duration) -> Self {
        self.delays.insert(instance_id.to_string(), delay);
        self
    }

    /// Report `latest` as the newest image of the same kind as `image_id`
    pub fn with_latest_image(mut self, image_id: &str, latest: &str) -> Self {
        self.latest_images
            .insert(image_id.to_string(), Ok(latest.to_string()));
        self
    }

    /// Make the latest-image lookup for `image_id` fail with `message`
    pub fn with_image_error(mut self, image_id: &str, message: &str) -> Self {
        self.latest_images
            .insert(image_id.to_string(), Err(message.to_string()));
        self
    }

    /// Make the instance listing itself fail
    pub fn with_listing_error(mut self, message: &str) -> Self {
        self.listing_error = Some(message.to_string());
        self
    }

    /// Number of volume lookups served so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Number of latest-image lookups served so far
    pub fn image_lookups(&self) -> usize {
        self.image_lookups.load(Ordering::SeqCst)
    }
}

impl InventoryProvider for ScriptedInventory {
    async fn instances(&self) -> Result<Vec<Instance>> {
        if let Some(message) = &self.listing_error {
            bail!("{message}");
        }
        Ok(self.instances.clone())
    }

    async fn volumes(&self, instance: &Instance) -> Result<Vec<Volume>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(instance.id()) {
            tokio::time::sleep(*delay).await;
        }
        match self.scripts.get(instance.id()) {
            Some(Script::Volumes(volumes)) => Ok(volumes.clone()),
            Some(Script::Fail(message)) => bail!("{message}"),
            None => Ok(Vec::new()),
        }
    }

    async fn latest_image(&self, image_id: &str) -> Result<String> {
        self.image_lookups.fetch_add(1, Ordering::SeqCst);
        match self.latest_images.get(image_id) {
            Some(Ok(latest)) => Ok(latest.clone()),
            Some(Err(message)) => bail!("{message}"),
            None => Ok(image_id.to_string()),
        }
    }
}
