//! Reference data import tests

mod helpers;

use deqar_common::db::reference::{find_agency, find_country, find_focus_country, find_reference_institution};
use deqar_ingest::reference_import::{load_reference_bundle, ReferenceBundle};
use helpers::*;
use serde_json::json;
use std::io::Write;

fn sample_bundle() -> ReferenceBundle {
    serde_json::from_value(json!({
        "countries": [
            {"iso_3166_alpha2": "at", "name_english": "Austria", "ehea_is_member": true},
            {"iso_3166_alpha2": "DE", "name_english": "Germany", "ehea_is_member": true}
        ],
        "agencies": [{
            "acronym": "ACQUIN",
            "name": "Accreditation, Certification and Quality Assurance Institute",
            "focus_countries": [
                {"country": "DE", "official": true},
                {"country": "Austria", "crossborder": true}
            ]
        }],
        "activities": [{"activity": "programme accreditation", "activity_type": "programme"}],
        "reference_institutions": [{
            "eter_id": "AT0001",
            "name_official": "Universität Wien",
            "name_english": "University of Vienna",
            "country": "AT",
            "city": "Vienna",
            "identifiers": [{"identifier": "A WIEN01", "resource": "Erasmus"}]
        }]
    }))
    .unwrap()
}

#[tokio::test]
async fn test_load_reference_bundle() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();

    let summary = load_reference_bundle(&pool, &sample_bundle()).await.unwrap();
    assert_eq!(summary.countries, 2);
    assert_eq!(summary.agencies, 1);
    assert_eq!(summary.focus_countries, 2);
    assert_eq!(summary.activities, 1);
    assert_eq!(summary.reference_institutions, 1);

    let mut conn = pool.acquire().await.unwrap();
    let austria = find_country(&mut conn, "AT").await.unwrap().unwrap();
    assert_eq!(austria.iso_3166_alpha2, "AT");

    let agency = find_agency(&mut conn, "acquin").await.unwrap().unwrap();
    let focus = find_focus_country(&mut conn, agency.id, austria.id).await.unwrap().unwrap();
    assert!(!focus.country_is_official);
    assert!(focus.country_is_crossborder);

    let record = find_reference_institution(&mut conn, "AT0001").await.unwrap().unwrap();
    assert_eq!(record.country_id, Some(austria.id));
    assert_eq!(record.city.as_deref(), Some("Vienna"));
}

#[tokio::test]
async fn test_reload_does_not_duplicate() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let bundle = sample_bundle();

    load_reference_bundle(&pool, &bundle).await.unwrap();
    load_reference_bundle(&pool, &bundle).await.unwrap();

    assert_eq!(count_rows(&pool, "countries").await, 2);
    assert_eq!(count_rows(&pool, "agencies").await, 1);
    assert_eq!(count_rows(&pool, "agency_focus_countries").await, 2);
    assert_eq!(count_rows(&pool, "reference_institutions").await, 1);
    assert_eq!(count_rows(&pool, "reference_institution_identifiers").await, 1);
}

#[tokio::test]
async fn test_unknown_focus_country_is_rejected() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let mut bundle = sample_bundle();
    bundle.agencies[0].focus_countries[0].country = "Atlantis".to_string();

    let err = load_reference_bundle(&pool, &bundle).await.unwrap_err();
    assert!(err.is_validation());
    assert!(err.to_string().contains("unknown focus country [Atlantis]"));

    // The bundle is all or nothing
    assert_eq!(count_rows(&pool, "countries").await, 0);
    assert_eq!(count_rows(&pool, "activities").await, 0);
    assert_eq!(count_rows(&pool, "agencies").await, 0);
    assert_eq!(count_rows(&pool, "agency_focus_countries").await, 0);
}

#[test]
fn test_bundle_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"countries": [{{"iso_3166_alpha2": "HU", "name_english": "Hungary"}}]}}"#).unwrap();

    let bundle = ReferenceBundle::from_file(file.path()).unwrap();
    assert_eq!(bundle.countries.len(), 1);
    assert!(!bundle.countries[0].ehea_is_member);
    assert!(bundle.agencies.is_empty());
}
