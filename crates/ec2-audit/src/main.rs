//! ec2-audit: compliance audit for running EC2 instances
//!
//! Checks every running instance in a region against tag, volume encryption,
//! network exposure and image freshness rules and prints one report line per
//! instance.

use anyhow::Result;
use clap::Parser;
use ec2_audit::aws::{AwsContext, Ec2Inventory, FromAwsContext, get_current_account_id};
use ec2_audit::config::{AuditConfig, AuditSettings, AwsConfig, OutputConfig};
use ec2_audit::defaults::{DEFAULT_CONCURRENCY, DEFAULT_LOOKUP_TIMEOUT_SECS, DEFAULT_REGION};
use ec2_audit::output::{self, OutputFormat, RunMetadata};
use ec2_audit_core::{Auditor, RuleId};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ec2-audit")]
#[command(about = "Audit running EC2 instances against compliance rules")]
#[command(version)]
struct Args {
    /// AWS region to audit
    #[arg(long, env = "AWS_REGION", default_value = DEFAULT_REGION)]
    region: String,

    /// AWS profile to use (overrides default credential resolution)
    #[arg(long, env = "AWS_PROFILE")]
    aws_profile: Option<String>,

    /// Comma-separated rules to apply, in report order
    #[arg(long, value_delimiter = ',', default_values_t = RuleId::ALL)]
    rules: Vec<RuleId>,

    /// Number of volume or image lookups in flight at once
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Timeout in seconds of one volume or image lookup, retries included
    #[arg(long, default_value_t = DEFAULT_LOOKUP_TIMEOUT_SECS)]
    lookup_timeout: u64,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Plain)]
    format: OutputFormat,

    /// Also write the JSON report to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log AWS responses and per-instance progress
    #[arg(short, long)]
    verbose: bool,
}

impl From<Args> for AuditConfig {
    fn from(args: Args) -> Self {
        Self {
            aws: AwsConfig {
                region: args.region,
                aws_profile: args.aws_profile,
            },
            audit: AuditSettings {
                rules: args.rules,
                concurrency: args.concurrency,
                lookup_timeout: Duration::from_secs(args.lookup_timeout),
            },
            output: OutputConfig {
                format: args.format,
                output: args.output,
                verbose: args.verbose,
            },
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    // Print main error message
    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    // Print error chain (causes)
    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if let Some(hint) = ec2_audit::aws::classify_anyhow_error(e).suggestion() {
        let _ = writeln!(stderr, "\n\x1b[2mHint:\x1b[0m {hint}");
    }
}

/// Stdout carries the report; logs go to stderr
fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let default_filter = format!("warn,ec2_audit={level},ec2_audit_core={level}");

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();
}

async fn run() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config: AuditConfig = args.into();
    config.validate()?;
    let rules = config.rule_set()?;

    if let Some(path) = &config.output.output {
        output::check_writable(path)?;
    }

    if let Some(profile) = &config.aws.aws_profile {
        info!(profile = %profile, "Using AWS profile");
    }

    let aws =
        AwsContext::with_profile(&config.aws.region, config.aws.aws_profile.as_deref()).await;
    let account_id = get_current_account_id(aws.sdk_config()).await?;

    let inventory =
        Ec2Inventory::from_context(&aws).with_lookup_timeout(config.audit.lookup_timeout);

    info!(
        region = %config.aws.region,
        rules = ?rules.names(),
        concurrency = config.audit.concurrency,
        "Starting compliance audit"
    );

    let metadata = RunMetadata {
        region: config.aws.region.clone(),
        account_id: Some(account_id.to_string()),
        rules: rules.names().into_iter().map(str::to_string).collect(),
        generated_at: chrono::Utc::now(),
    };

    let auditor = Auditor::with_options(inventory, rules, config.audit_options());
    let audit = auditor.run().await?;

    let summary = audit.summary();
    info!(
        all_instances = summary.all_instances,
        running_instances = summary.running_instances,
        compliant_instances = summary.compliant_instances,
        status = %summary.status(),
        "Audit complete"
    );

    print!("{}", output::render(config.output.format, &metadata, &audit)?);
    if config.output.format == OutputFormat::Json {
        println!();
    }

    if let Some(path) = &config.output.output {
        // Completed runs exit 0 even when the file copy fails
        if let Err(e) = output::write_json(path, &metadata, &audit) {
            warn!(error = %format!("{e:#}"), "Could not write report file");
        }
    }

    Ok(())
}
