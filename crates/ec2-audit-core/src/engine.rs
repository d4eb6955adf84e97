//! Evaluation engine
//!
//! [`evaluate`] is a pure single pass over a snapshot. [`Auditor`] builds that
//! snapshot from an injected [`InventoryProvider`], fetching volumes for
//! several instances at once while keeping the provider's instance order.

use crate::model::{AuditTarget, ImageData, Instance, InstanceState, Volume, VolumeData};
use crate::report::{AuditRun, Report, Verdict};
use crate::rules::{Facts, Lookup, RuleSet};
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Source of the instances, volumes and images to audit.
///
/// Implementations own transport, retries and per-lookup timeouts. A failed
/// [`instances`](InventoryProvider::instances) call aborts the run; a failed
/// lookup only affects the instances that depend on it.
#[allow(async_fn_in_trait)] // Consumed by generic code only, never boxed
#[cfg_attr(test, mockall::automock)]
pub trait InventoryProvider: Send + Sync {
    /// List instances in every state, with their tags
    async fn instances(&self) -> Result<Vec<Instance>>;

    /// List volumes attached to an instance, with root identity resolved
    async fn volumes(&self, instance: &Instance) -> Result<Vec<Volume>>;

    /// ID of the newest available image of the same kind as `image_id`
    async fn latest_image(&self, image_id: &str) -> Result<String>;
}

/// Apply every rule to every instance.
///
/// Returns one report per target in snapshot order, each with one verdict
/// per rule in registration order. Rules whose lookup failed for a target
/// fail closed.
pub fn evaluate(snapshot: &[AuditTarget], rules: &RuleSet) -> Vec<Report> {
    snapshot.iter().map(|t| evaluate_target(t, rules)).collect()
}

fn evaluate_target(target: &AuditTarget, rules: &RuleSet) -> Report {
    let volumes = target.volumes.volumes();
    let latest_image_id = target.image.latest_image_id();
    let facts = Facts {
        volumes: volumes.unwrap_or_default(),
        latest_image_id,
    };

    let verdicts = rules
        .iter()
        .map(|rule| {
            let available = match rule.requires() {
                None => true,
                Some(Lookup::Volumes) => volumes.is_some(),
                Some(Lookup::LatestImage) => latest_image_id.is_some(),
            };
            Verdict::new(
                rule.name(),
                available && rule.evaluate(&target.instance, &facts),
            )
        })
        .collect();

    Report::new(
        target.instance.id(),
        target.instance.name().map(str::to_string),
        verdicts,
    )
    .with_volume_error(target.volumes.failure_reason().map(str::to_string))
    .with_image_error(target.image.failure_reason().map(str::to_string))
}

/// Tuning for [`Auditor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditOptions {
    /// Maximum number of provider lookups in flight
    pub concurrency: usize,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self { concurrency: 8 }
    }
}

/// Running instances with their lookup data, plus the size of the full listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Instances listed in any state
    pub all_instances: usize,
    /// Running instances in provider order
    pub targets: Vec<AuditTarget>,
}

/// Runs a rule set against the inventory of one provider
#[derive(Debug)]
pub struct Auditor<P> {
    provider: P,
    rules: RuleSet,
    options: AuditOptions,
}

impl<P: InventoryProvider> Auditor<P> {
    pub fn new(provider: P, rules: RuleSet) -> Self {
        Self::with_options(provider, rules, AuditOptions::default())
    }

    pub fn with_options(provider: P, rules: RuleSet, options: AuditOptions) -> Self {
        Self {
            provider,
            rules,
            options,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Fetch the instance list and the lookup data of each running instance.
    ///
    /// Only a failure to list instances is returned as an error.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let instances = self
            .provider
            .instances()
            .await
            .context("Failed to list instances")?;

        let all_instances = instances.len();
        let running: Vec<Instance> = instances
            .into_iter()
            .filter(|i| {
                let keep = i.state() == InstanceState::Running;
                if !keep {
                    debug!(
                        instance_id = %i.id(),
                        state = %i.state(),
                        "Skipping non-running instance"
                    );
                }
                keep
            })
            .collect();

        info!(
            total = all_instances,
            running = running.len(),
            "Fetched instance inventory"
        );

        let images = if self.rules.requires(Lookup::LatestImage) {
            Some(self.latest_images(&running).await)
        } else {
            None
        };

        let targets: Vec<AuditTarget> = stream::iter(running)
            .map(|instance| async move {
                let volumes = match self.provider.volumes(&instance).await {
                    Ok(volumes) => {
                        debug!(
                            instance_id = %instance.id(),
                            count = volumes.len(),
                            "Fetched volumes"
                        );
                        VolumeData::Known(volumes)
                    }
                    Err(e) => {
                        let reason = format!("{e:#}");
                        warn!(
                            instance_id = %instance.id(),
                            error = %reason,
                            "Volume lookup failed, volume rules will fail"
                        );
                        VolumeData::unavailable(reason)
                    }
                };
                AuditTarget::new(instance, volumes)
            })
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await;

        let targets = match images {
            Some(images) => targets
                .into_iter()
                .map(|t| {
                    let image = image_data(&t.instance, &images);
                    t.with_image(image)
                })
                .collect(),
            None => targets,
        };

        Ok(Snapshot {
            all_instances,
            targets,
        })
    }

    /// Resolve the latest image once per distinct image ID
    async fn latest_images(&self, instances: &[Instance]) -> HashMap<String, ImageData> {
        let image_ids: BTreeSet<&str> = instances.iter().filter_map(Instance::image_id).collect();

        stream::iter(image_ids)
            .map(|image_id| async move {
                let data = match self.provider.latest_image(image_id).await {
                    Ok(latest) => {
                        debug!(image_id, latest_image_id = %latest, "Resolved latest image");
                        ImageData::known(latest)
                    }
                    Err(e) => {
                        let reason = format!("{e:#}");
                        warn!(
                            image_id,
                            error = %reason,
                            "Image lookup failed, image rules will fail"
                        );
                        ImageData::unavailable(reason)
                    }
                };
                (image_id.to_string(), data)
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await
    }

    /// Build a snapshot and evaluate the rule set against it
    pub async fn run(&self) -> Result<AuditRun> {
        let snapshot = self.snapshot().await?;
        let reports = evaluate(&snapshot.targets, &self.rules);
        Ok(AuditRun::new(snapshot.all_instances, reports))
    }
}

fn image_data(instance: &Instance, images: &HashMap<String, ImageData>) -> ImageData {
    match instance.image_id() {
        Some(id) => images
            .get(id)
            .cloned()
            .unwrap_or_else(|| ImageData::unavailable(format!("No lookup result for {id}"))),
        None => ImageData::unavailable("Instance has no image ID"),
    }
}
