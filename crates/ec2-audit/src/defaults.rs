//! Default configuration values

/// Region audited when neither `--region` nor `AWS_REGION` is set
pub const DEFAULT_REGION: &str = "us-east-1";

/// Provider lookups in flight at once
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Upper bound on one volume or image lookup, retries included
pub const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 30;
