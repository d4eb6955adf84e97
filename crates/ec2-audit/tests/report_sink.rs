//! Audit-to-output pipeline against a scripted inventory

use chrono::Utc;
use ec2_audit::config::AuditConfig;
use ec2_audit::output::{self, OutputFormat, RunMetadata};
use ec2_audit_core::{Auditor, Instance, InstanceState, RuleSet};
use ec2_audit_test_utils::{ScriptedInventory, data_volume, named_instance, root_volume};

fn inventory() -> ScriptedInventory {
    ScriptedInventory::new()
        .with_instance(
            named_instance("i-aaa", "web-1"),
            vec![root_volume("vol-1", false)],
        )
        .with_instance(
            named_instance("i-bbb", "web-2"),
            vec![root_volume("vol-2", true), data_volume("vol-3", false)],
        )
        .with_instance(
            Instance::builder("i-off")
                .state(InstanceState::Stopped)
                .build(),
            vec![],
        )
        .with_failing_instance(named_instance("i-ccc", "db-1"), "UnauthorizedOperation")
}

fn metadata(rules: &RuleSet, account_id: Option<&str>) -> RunMetadata {
    RunMetadata {
        region: "us-east-1".to_string(),
        account_id: account_id.map(str::to_string),
        rules: rules.names().into_iter().map(str::to_string).collect(),
        generated_at: Utc::now(),
    }
}

#[tokio::test]
async fn plain_output_matches_rule_order() {
    let config = AuditConfig::default();
    let rules = config.rule_set().unwrap();
    let metadata = metadata(&rules, None);

    let auditor = Auditor::with_options(inventory(), rules, config.audit_options());
    let audit = auditor.run().await.unwrap();
    let out = output::render(OutputFormat::Plain, &metadata, &audit).unwrap();

    let lines: Vec<_> = out.lines().collect();
    assert_eq!(
        lines,
        vec![
            "i-aaa name_tag_set=true all_volumes_encrypted=false \
             all_non_root_volumes_encrypted=true no_public_ip=true image_up_to_date=true",
            "i-bbb name_tag_set=true all_volumes_encrypted=false \
             all_non_root_volumes_encrypted=false no_public_ip=true image_up_to_date=true",
            "i-ccc name_tag_set=true all_volumes_encrypted=false \
             all_non_root_volumes_encrypted=false no_public_ip=true image_up_to_date=true",
            "CRITICAL | all_instances=4 running_instances=3 compliant_instances=0",
        ]
    );
}

#[tokio::test]
async fn json_output_records_lookup_failures() {
    let config = AuditConfig::default();
    let rules = config.rule_set().unwrap();
    let metadata = metadata(&rules, Some("123456789012"));

    let audit = Auditor::new(inventory(), rules).run().await.unwrap();
    let json = output::render(OutputFormat::Json, &metadata, &audit).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value["reports"].as_array().unwrap().len(), 3);
    assert_eq!(value["summary"]["all_instances"], 4);
    let failed = &value["reports"][2];
    assert_eq!(failed["instance_id"], "i-ccc");
    assert!(
        failed["volume_error"]
            .as_str()
            .unwrap()
            .contains("UnauthorizedOperation")
    );
}

#[tokio::test]
async fn report_file_matches_stdout_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.json");

    let rules = RuleSet::standard();
    let metadata = metadata(&rules, None);
    let audit = Auditor::new(inventory(), rules).run().await.unwrap();

    output::check_writable(&path).unwrap();
    output::write_json(&path, &metadata, &audit).unwrap();

    let written = std::fs::read_to_string(&path).unwrap();
    let rendered = output::render(OutputFormat::Json, &metadata, &audit).unwrap();
    assert_eq!(written, rendered);
}
