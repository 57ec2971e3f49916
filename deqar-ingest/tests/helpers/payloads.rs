//! Submission payload builders

use serde_json::{json, Value};

/// Voluntary, positive report with one downloadable file
pub fn report_payload(agency: &str, local_identifier: &str) -> Value {
    json!({
        "agency": agency,
        "local_identifier": local_identifier,
        "activities": ["programme accreditation"],
        "status": "voluntary",
        "decision": "positive",
        "valid_from": "2022-01-15",
        "valid_to": "2028-01-14",
        "report_files": [{
            "display_name": "Accreditation report",
            "original_location": "https://reports.example.org/report.pdf",
            "report_language": ["en"]
        }]
    })
}

/// Same as [`report_payload`] with the given institutions
pub fn with_institutions(agency: &str, local_identifier: &str, institutions: Value) -> Value {
    let mut payload = report_payload(agency, local_identifier);
    payload["institutions"] = institutions;
    payload
}
