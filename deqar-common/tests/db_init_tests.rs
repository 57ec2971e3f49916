//! Database initialization and reference data tests

use deqar_common::db::init::{init_database, IDENTIFIER_RESOURCES, QF_EHEA_LEVELS};
use deqar_common::db::models::ReferenceInstitution;
use deqar_common::db::reference::{
    ensure_crossborder_focus_country, find_agency, find_country, find_focus_country,
    find_identifier_resource, find_qf_ehea_level, find_reference_institution,
    reference_identifiers, upsert_agency, upsert_country, upsert_focus_country,
    upsert_reference_institution, ReferenceIdentifier,
};
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("deqar.db");

    let result = init_database(&db_path).await;
    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("deqar.db");

    let pool1 = init_database(&db_path).await.unwrap();
    pool1.close().await;

    // Second run re-applies the schema and seeds without duplicating rows
    let pool2 = init_database(&db_path).await.unwrap();

    let levels: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM qf_ehea_levels")
        .fetch_one(&pool2)
        .await
        .unwrap();
    assert_eq!(levels, QF_EHEA_LEVELS.len() as i64);

    let resources: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM identifier_resources")
        .fetch_one(&pool2)
        .await
        .unwrap();
    assert_eq!(resources, IDENTIFIER_RESOURCES.len() as i64);
}

#[tokio::test]
async fn test_vocabulary_lookups() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("deqar.db")).await.unwrap();
    let mut conn = pool.acquire().await.unwrap();

    let by_name = find_qf_ehea_level(&mut conn, "Second Cycle").await.unwrap().unwrap();
    let by_code = find_qf_ehea_level(&mut conn, "2").await.unwrap().unwrap();
    assert_eq!(by_name, by_code);
    assert!(find_qf_ehea_level(&mut conn, "fourth cycle").await.unwrap().is_none());

    assert_eq!(
        find_identifier_resource(&mut conn, "erasmus").await.unwrap(),
        Some("Erasmus".to_string())
    );
    assert!(find_identifier_resource(&mut conn, "passport").await.unwrap().is_none());
}

#[tokio::test]
async fn test_agency_and_country_lookups() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("deqar.db")).await.unwrap();
    let mut conn = pool.acquire().await.unwrap();

    let country_id = upsert_country(&mut conn, "at", "Austria", true).await.unwrap();
    let agency_id = upsert_agency(&mut conn, "ACQUIN", "Accreditation, Certification and Quality Assurance Institute")
        .await
        .unwrap();


    let country = find_country(&mut conn, "AT").await.unwrap().unwrap();
    assert_eq!(country.id, country_id);
    assert_eq!(country.iso_3166_alpha2, "AT");
    assert!(country.ehea_is_member);
    assert_eq!(find_country(&mut conn, "austria").await.unwrap().unwrap().id, country_id);

    assert_eq!(find_agency(&mut conn, "acquin").await.unwrap().unwrap().id, agency_id);
    assert_eq!(
        find_agency(&mut conn, &agency_id.to_string()).await.unwrap().unwrap().acronym_primary,
        "ACQUIN"
    );
    assert!(find_agency(&mut conn, "NOPE").await.unwrap().is_none());
}

#[tokio::test]
async fn test_crossborder_focus_country_created_once() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("deqar.db")).await.unwrap();
    let mut conn = pool.acquire().await.unwrap();

    let country_id = upsert_country(&mut conn, "HU", "Hungary", true).await.unwrap();
    let agency_id = upsert_agency(&mut conn, "AQ", "AQ Austria").await.unwrap();

    let (first, created) = ensure_crossborder_focus_country(&mut conn, agency_id, country_id)
        .await
        .unwrap();
    assert!(created);
    assert!(first.country_is_crossborder);
    assert!(!first.country_is_official);

    let (second, created_again) = ensure_crossborder_focus_country(&mut conn, agency_id, country_id)
        .await
        .unwrap();
    assert!(!created_again);
    assert_eq!(first.id, second.id);
}

#[tokio::test]
async fn test_declared_focus_country_not_overwritten_by_crossborder() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("deqar.db")).await.unwrap();
    let mut conn = pool.acquire().await.unwrap();

    let country_id = upsert_country(&mut conn, "DE", "Germany", true).await.unwrap();
    let agency_id = upsert_agency(&mut conn, "ACQUIN", "ACQUIN").await.unwrap();
    upsert_focus_country(&mut conn, agency_id, country_id, true, false).await.unwrap();

    let (focus, created) = ensure_crossborder_focus_country(&mut conn, agency_id, country_id)
        .await
        .unwrap();
    assert!(!created);
    assert!(focus.country_is_official);
    assert!(!focus.country_is_crossborder);

    let found = find_focus_country(&mut conn, agency_id, country_id).await.unwrap();
    assert_eq!(found, Some(focus));
}

#[tokio::test]
async fn test_reference_institution_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("deqar.db")).await.unwrap();
    let mut conn = pool.acquire().await.unwrap();
    let country_id = upsert_country(&mut conn, "AT", "Austria", true).await.unwrap();

    let record = ReferenceInstitution {
        eter_id: "AT0001".to_string(),
        name_official: "Universität Wien".to_string(),
        name_english: Some("University of Vienna".to_string()),
        acronym: None,
        website_link: Some("https://www.univie.ac.at".to_string()),
        country_id: Some(country_id),
        city: Some("Vienna".to_string()),
        lat: None,
        long: None,
    };
    let identifiers = vec![ReferenceIdentifier {
        identifier: "A WIEN01".to_string(),
        resource: "Erasmus".to_string(),
    }];

    upsert_reference_institution(&mut conn, &record, &identifiers).await.unwrap();
    // Reloading the same record must replace, not duplicate, its identifiers
    upsert_reference_institution(&mut conn, &record, &identifiers).await.unwrap();

    let loaded = find_reference_institution(&mut conn, "AT0001").await.unwrap().unwrap();
    assert_eq!(loaded, record);
    assert_eq!(reference_identifiers(&mut conn, "AT0001").await.unwrap(), identifiers);
}
