//! ec2-audit - compliance audit for running EC2 instances
//!
//! This crate wires the rule engine in `ec2-audit-core` to AWS: session and
//! credential setup, the EC2-backed inventory provider, run configuration,
//! and report rendering.

pub mod aws;
pub mod config;
pub mod defaults;
pub mod output;
