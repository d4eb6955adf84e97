//! EC2-backed inventory provider
//!
//! Lists instances with `DescribeInstances`, their attached volumes with
//! `DescribeVolumes` and image successors with `DescribeImages`. Root volumes
//! are identified by matching each attachment's device name against the
//! instance's root device name.

use crate::aws::context::{AwsContext, FromAwsContext};
use crate::aws::error::{AwsError, classify_anyhow_error};
use crate::defaults::DEFAULT_LOOKUP_TIMEOUT_SECS;
use anyhow::{Context, Result, anyhow};
use aws_sdk_ec2::Client;
use aws_sdk_ec2::types::{DeviceType, Filter, Image};
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use ec2_audit_core::{Instance, InstanceState, InventoryProvider, Tag, Volume};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Inventory provider for one region
pub struct Ec2Inventory {
    client: Client,
    lookup_timeout: Duration,
    backoff: ExponentialBuilder,
}

impl FromAwsContext for Ec2Inventory {
    fn from_context(ctx: &AwsContext) -> Self {
        Self::new(ctx.ec2_client())
    }
}

impl Ec2Inventory {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            lookup_timeout: Duration::from_secs(DEFAULT_LOOKUP_TIMEOUT_SECS),
            backoff: ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(500))
                .with_max_delay(Duration::from_secs(5))
                .with_max_times(5),
        }
    }

    /// Bound each volume or image lookup, retries included
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Backoff applied to throttled calls
    pub fn with_backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run `op`, retrying throttled calls, until `lookup_timeout` elapses.
    ///
    /// Permission and credential errors are tagged with their [`AwsError`]
    /// so the report shows why the lookup failed.
    async fn bounded<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lookup = op
            .retry(self.backoff)
            .when(|e| classify_anyhow_error(e).is_retryable())
            .notify(|e, dur| {
                warn!(
                    delay = ?dur,
                    lookup = what,
                    error = %e,
                    "AWS rate limited, backing off..."
                );
            });

        match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(result) => result.map_err(|e| match classify_anyhow_error(&e) {
                err @ (AwsError::AccessDenied | AwsError::AuthFailure) => e.context(err),
                _ => e,
            }),
            Err(_) => Err(anyhow!("{what} timed out after {:?}", self.lookup_timeout)),
        }
    }

    async fn describe_volumes(&self, instance: &Instance) -> Result<Vec<Volume>> {
        let mut pages = self
            .client
            .describe_volumes()
            .filters(filter("attachment.instance-id", instance.id()))
            .into_paginator()
            .send();

        let mut volumes = Vec::new();
        while let Some(page) = pages.next().await {
            let page =
                page.with_context(|| format!("Failed to describe volumes of {}", instance.id()))?;
            debug!(instance_id = %instance.id(), response = ?page, "DescribeVolumes page");
            volumes.extend(page.volumes().iter().map(|v| volume_from_sdk(v, instance)));
        }

        Ok(volumes)
    }

    async fn describe_latest_image(&self, image_id: &str) -> Result<String> {
        let output = self
            .client
            .describe_images()
            .image_ids(image_id)
            .send()
            .await
            .with_context(|| format!("Failed to describe image {image_id}"))
            .map_err(|e| {
                if classify_anyhow_error(&e).is_not_found() {
                    e.context(format!(
                        "Image {image_id} is deregistered or not visible to this account"
                    ))
                } else {
                    e
                }
            })?;

        let image = output
            .images()
            .first()
            .with_context(|| format!("Image {image_id} not found"))?;
        let filters = image_kind_filters(image)?;
        debug!(image_id, filters = ?filters, "Searching images of the same kind");

        let mut pages = self
            .client
            .describe_images()
            .set_filters(Some(filters))
            .into_paginator()
            .send();

        let mut candidates = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.with_context(|| format!("Failed to list images like {image_id}"))?;
            candidates.extend(page.images().iter().cloned());
        }

        newest_image_id(&candidates)
            .map(str::to_string)
            .with_context(|| format!("No available image matches the kind of {image_id}"))
    }
}

impl InventoryProvider for Ec2Inventory {
    async fn instances(&self) -> Result<Vec<Instance>> {
        let mut pages = self.client.describe_instances().into_paginator().send();

        let mut instances = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.context("Failed to describe instances")?;
            debug!(response = ?page, "DescribeInstances page");

            for reservation in page.reservations() {
                for instance in reservation.instances() {
                    match instance_from_sdk(instance) {
                        Some(instance) => instances.push(instance),
                        None => warn!("Skipping instance without an instance ID"),
                    }
                }
            }
        }

        debug!(count = instances.len(), "Found instances");
        Ok(instances)
    }

    async fn volumes(&self, instance: &Instance) -> Result<Vec<Volume>> {
        let what = format!("Volume lookup for {}", instance.id());
        self.bounded(&what, || self.describe_volumes(instance))
            .await
    }

    async fn latest_image(&self, image_id: &str) -> Result<String> {
        let what = format!("Latest image lookup for {image_id}");
        self.bounded(&what, || self.describe_latest_image(image_id))
            .await
    }
}

fn filter(name: &str, value: &str) -> Filter {
    Filter::builder().name(name).values(value).build()
}

/// Filters selecting available images of the same kind as `image`.
///
/// Same owner, architecture, virtualization type and root device type; for
/// EBS-backed images also the volume type of the root device mapping.
pub fn image_kind_filters(image: &Image) -> Result<Vec<Filter>> {
    let id = image.image_id().unwrap_or("image");
    let architecture = image
        .architecture()
        .with_context(|| format!("{id} has no architecture"))?;
    let owner_id = image
        .owner_id()
        .with_context(|| format!("{id} has no owner ID"))?;
    let root_device_type = image
        .root_device_type()
        .with_context(|| format!("{id} has no root device type"))?;
    let virtualization_type = image
        .virtualization_type()
        .with_context(|| format!("{id} has no virtualization type"))?;

    let mut filters = vec![
        filter("architecture", architecture.as_str()),
        filter("owner-id", owner_id),
        filter("root-device-type", root_device_type.as_str()),
        filter("state", "available"),
        filter("virtualization-type", virtualization_type.as_str()),
    ];

    if *root_device_type == DeviceType::Ebs {
        let root_volume_type = image
            .block_device_mappings()
            .iter()
            .find(|m| m.device_name().is_some() && m.device_name() == image.root_device_name())
            .and_then(|m| m.ebs())
            .and_then(|ebs| ebs.volume_type());
        match root_volume_type {
            Some(volume_type) => filters.push(filter(
                "block-device-mapping.volume-type",
                volume_type.as_str(),
            )),
            None => debug!(image_id = id, "No root volume type on image, not filtering on it"),
        }
    }

    Ok(filters)
}

/// ID of the most recently created image; images without a parseable creation date are ignored
pub fn newest_image_id(images: &[Image]) -> Option<&str> {
    images
        .iter()
        .filter_map(|image| Some((creation_time(image)?, image.image_id()?)))
        .max_by_key(|(created, _)| *created)
        .map(|(_, id)| id)
}

fn creation_time(image: &Image) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(image.creation_date()?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Convert an SDK instance into the audit model.
///
/// Returns `None` when the instance has no ID. Tags without a key are dropped.
pub fn instance_from_sdk(instance: &aws_sdk_ec2::types::Instance) -> Option<Instance> {
    let id = instance.instance_id()?;

    let state = instance
        .state()
        .and_then(|s| s.name())
        .map(|name| InstanceState::from_name(name.as_str()))
        .unwrap_or(InstanceState::Unknown);

    let tags = instance
        .tags()
        .iter()
        .filter_map(|t| Tag::from_raw(t.key(), t.value()));

    let mut builder = Instance::builder(id).state(state).tags(tags);
    if let Some(root) = instance.root_device_name() {
        builder = builder.root_device_name(root);
    }
    if let Some(ip) = instance.public_ip_address() {
        builder = builder.public_ip(ip);
    }
    if let Some(image_id) = instance.image_id() {
        builder = builder.image_id(image_id);
    }

    Some(builder.build())
}

/// Convert an SDK volume into the audit model for the instance it is attached to
pub fn volume_from_sdk(volume: &aws_sdk_ec2::types::Volume, instance: &Instance) -> Volume {
    let device = volume
        .attachments()
        .iter()
        .find(|a| a.instance_id() == Some(instance.id()))
        .and_then(|a| a.device());

    Volume::from_attachment(
        volume.volume_id(),
        volume.encrypted(),
        device,
        instance.root_device_name(),
    )
}
