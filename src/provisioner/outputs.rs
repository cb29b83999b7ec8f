//! Parsing of the IaC tool's `output -json` payloads. Failures here are a
//! distinct error class from tool execution failures so admin tooling can
//! tell a broken module apart from a broken run.

use std::collections::HashMap;

use crate::db::models::ApplyTiming;
use crate::provisioner::ProvisionerError;

pub fn parse_apply_times(raw: &str) -> Result<HashMap<String, ApplyTiming>, ProvisionerError> {
    serde_json::from_str(raw).map_err(|e| {
        ProvisionerError::Output(format!("instance_terraform_apply_times: {e}"))
    })
}

pub fn parse_string_list(name: &str, raw: &str) -> Result<Vec<String>, ProvisionerError> {
    serde_json::from_str(raw).map_err(|e| ProvisionerError::Output(format!("{name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_apply_times_map() {
        let raw = r#"{
            "lablink-vm-1": {
                "start_time": "2026-08-01T12:00:00Z",
                "end_time": "2026-08-01T12:02:30Z",
                "seconds": 150.0
            },
            "lablink-vm-2": {
                "start_time": "2026-08-01T12:00:00Z",
                "end_time": "2026-08-01T12:03:00Z",
                "seconds": 180.5
            }
        }"#;
        let times = parse_apply_times(raw).unwrap();
        assert_eq!(times.len(), 2);
        assert_eq!(times["lablink-vm-2"].seconds, 180.5);
    }

    #[test]
    fn malformed_apply_times_is_output_error() {
        let err = parse_apply_times("{\"vm\": \"oops\"}").unwrap_err();
        assert!(matches!(err, ProvisionerError::Output(_)));
    }

    #[test]
    fn parses_ip_list() {
        let ips = parse_string_list("instance_ips", r#"["10.0.0.5","10.0.0.6"]"#).unwrap();
        assert_eq!(ips, vec!["10.0.0.5", "10.0.0.6"]);
    }

    #[test]
    fn parses_id_list() {
        let ids =
            parse_string_list("instance_ids", r#"["i-0abc123","i-0def456"]"#).unwrap();
        assert_eq!(ids, vec!["i-0abc123", "i-0def456"]);
    }

    #[test]
    fn non_list_output_is_output_error() {
        assert!(matches!(
            parse_string_list("instance_ips", "\"10.0.0.5\"").unwrap_err(),
            ProvisionerError::Output(_)
        ));
    }
}
