//! AWS error classification and handling
//!
//! Provides typed errors for AWS SDK operations using the `.code()` method
//! instead of string matching on Debug format.

use thiserror::Error;

/// AWS error categories for retry and reporting logic
#[derive(Debug, Error)]
pub enum AwsError {
    /// Credentials missing, expired or rejected
    #[error("AWS credentials were rejected")]
    AuthFailure,

    /// Credentials valid but lacking permission for the call
    #[error("Access denied")]
    AccessDenied,

    /// Resource was not found (e.g. image deregistered or instance terminated mid-run)
    #[error("Resource not found: {message}")]
    NotFound { message: String },

    /// Rate limit exceeded (retryable with backoff)
    #[error("Rate limit exceeded")]
    Throttled,

    /// Generic AWS SDK error with code and message
    #[error("AWS error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AwsError {
    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(self, AwsError::Throttled)
    }

    /// Get a user-friendly suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            AwsError::AuthFailure => Some(
                "Check AWS credentials: set AWS_PROFILE or --aws-profile, or refresh an SSO session with `aws sso login`.",
            ),
            AwsError::AccessDenied => Some(
                "The credentials need ec2:DescribeInstances, ec2:DescribeVolumes and ec2:DescribeImages permissions.",
            ),
            AwsError::Throttled => {
                Some("AWS API rate limit hit. Lower --concurrency and try again.")
            }
            AwsError::NotFound { .. } | AwsError::Sdk { .. } => None,
        }
    }
}

/// Known AWS error codes for rejected credentials
const AUTH_CODES: &[&str] = &[
    "AuthFailure",
    "InvalidClientTokenId",
    "UnrecognizedClientException",
    "ExpiredToken",
    "ExpiredTokenException",
    "SignatureDoesNotMatch",
];

/// Known AWS error codes for missing permissions
const ACCESS_DENIED_CODES: &[&str] = &[
    "UnauthorizedOperation",
    "AccessDenied",
    "AccessDeniedException",
];

/// Known AWS error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &[
    "InvalidInstanceID.NotFound",
    "InvalidVolume.NotFound",
    "InvalidAMIID.NotFound",
];

/// Known AWS error codes for throttling/rate limiting
const THROTTLING_CODES: &[&str] = &["Throttling", "ThrottlingException", "RequestLimitExceeded"];

/// Classify an AWS SDK error using the error code.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if AUTH_CODES.contains(&c) => AwsError::AuthFailure,
        Some(c) if ACCESS_DENIED_CODES.contains(&c) => AwsError::AccessDenied,
        Some(c) if NOT_FOUND_CODES.contains(&c) => AwsError::NotFound { message },
        Some(c) if THROTTLING_CODES.contains(&c) => AwsError::Throttled,
        _ => AwsError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

/// Classify an error from an anyhow::Error by extracting the AWS error code.
///
/// Walks the error chain using `ProvideErrorMetadata` to extract `.code()` and
/// `.message()` from any AWS SDK error. Falls back to string matching on the
/// Debug representation if no typed error is found.
pub fn classify_anyhow_error(error: &anyhow::Error) -> AwsError {
    use aws_sdk_ec2::error::{ProvideErrorMetadata, SdkError};
    use aws_sdk_ec2::operation::{
        describe_images::DescribeImagesError, describe_instances::DescribeInstancesError,
        describe_volumes::DescribeVolumesError,
    };
    use aws_sdk_sts::operation::get_caller_identity::GetCallerIdentityError;

    for cause in error.chain() {
        let meta = if let Some(e) = cause.downcast_ref::<SdkError<DescribeInstancesError>>() {
            e.meta()
        } else if let Some(e) = cause.downcast_ref::<SdkError<DescribeVolumesError>>() {
            e.meta()
        } else if let Some(e) = cause.downcast_ref::<SdkError<DescribeImagesError>>() {
            e.meta()
        } else if let Some(e) = cause.downcast_ref::<SdkError<GetCallerIdentityError>>() {
            e.meta()
        } else {
            continue;
        };
        return classify_aws_error(meta.code(), meta.message());
    }

    // Fallback: extract error code from debug string representation
    let debug_str = format!("{:?}", error);
    if let Some(code) = extract_error_code(&debug_str) {
        return classify_aws_error(Some(&code), Some(&error.to_string()));
    }

    AwsError::Sdk {
        code: None,
        message: error.to_string(),
    }
}

/// Extract an AWS error code from a debug string representation
fn extract_error_code(debug_str: &str) -> Option<String> {
    let known = AUTH_CODES
        .iter()
        .chain(ACCESS_DENIED_CODES)
        .chain(NOT_FOUND_CODES)
        .chain(THROTTLING_CODES);
    for code in known {
        if debug_str.contains(code) {
            return Some((*code).to_string());
        }
    }

    // Try to extract any code from `code: Some("...")` pattern
    if let Some(start) = debug_str.find("code: Some(\"") {
        let rest = &debug_str[start + 12..];
        if let Some(end) = rest.find('"') {
            return Some(rest[..end].to_string());
        }
    }

    None
}
