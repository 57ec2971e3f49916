//! Report flag engine tests
//!
//! Rules are exercised through full submissions so the flagging pass sees
//! the same committed state a real unit produces.

mod helpers;

use deqar_common::config::IngestConfig;
use deqar_common::db::models::FlagLevel;
use deqar_common::db::reference::find_focus_country;
use deqar_common::EventBus;
use deqar_ingest::db::reports::{active_flags, get_report, report_flags, set_flag_removed_by_eqar};
use deqar_ingest::SubmissionMode;
use helpers::*;
use serde_json::{json, Value};

fn file_without_source(payload: &mut Value) {
    payload["report_files"] = json!([{"display_name": "Summary", "report_language": ["de"]}]);
}

#[tokio::test]
async fn test_clean_report_has_no_flags() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let registry = seed_registry(&pool).await.unwrap();
    add_institution(&pool, "Universität Bonn", registry.germany, Some("Bonn")).await;
    let orchestrator = test_orchestrator(&pool, EventBus::new(16));

    let mut payload = with_institutions("ACQUIN", "R-1", json!([{"deqar_id": "DEQARINST0001"}]));
    payload["status"] = json!("part of obligatory EQA system");
    let outcome = orchestrator.submit(payload, SubmissionMode::Upsert).await;

    assert!(outcome.is_success(), "{:?}", outcome.errors);
    assert_eq!(outcome.flag_level, Some(FlagLevel::None));
    assert_eq!(count_rows(&pool, "report_flags").await, 0);
}

#[tokio::test]
async fn test_obligatory_report_in_non_official_country_is_high() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let registry = seed_registry(&pool).await.unwrap();
    add_institution(&pool, "Universität Wien", registry.austria, Some("Vienna")).await;
    let orchestrator = test_orchestrator(&pool, EventBus::new(16));

    let mut payload = with_institutions("ACQUIN", "R-AT", json!([{"deqar_id": "DEQARINST0001"}]));
    payload["status"] = json!("part of obligatory EQA system");
    let outcome = orchestrator.submit(payload, SubmissionMode::Upsert).await;

    assert!(outcome.is_success(), "{:?}", outcome.errors);
    assert_eq!(outcome.flag_level, Some(FlagLevel::High));
    assert_eq!(outcome.report_flags.len(), 1);
    assert!(outcome.report_flags[0].contains("does not have official status"));
    assert!(outcome.report_flags[0].contains("[Austria]"));

    let mut conn = pool.acquire().await.unwrap();
    let report = get_report(&mut conn, outcome.report_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(report.flag(), FlagLevel::High);
}

#[tokio::test]
async fn test_voluntary_report_in_non_official_country_is_not_flagged() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let registry = seed_registry(&pool).await.unwrap();
    add_institution(&pool, "Universität Wien", registry.austria, Some("Vienna")).await;
    let orchestrator = test_orchestrator(&pool, EventBus::new(16));

    let payload = with_institutions("ACQUIN", "R-AT", json!([{"deqar_id": "DEQARINST0001"}]));
    let outcome = orchestrator.submit(payload, SubmissionMode::Upsert).await;

    assert!(outcome.is_success(), "{:?}", outcome.errors);
    assert_eq!(outcome.flag_level, Some(FlagLevel::None));
}

#[tokio::test]
async fn test_unknown_country_is_added_to_focus_list_once() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let registry = seed_registry(&pool).await.unwrap();
    let orchestrator = test_orchestrator(&pool, EventBus::new(16));

    let payload = with_institutions(
        "ACQUIN",
        "R-HU",
        json!([{
            "name_official": "Szegedi Tudományegyetem",
            "locations": [{"country": "HU", "city": "Szeged"}]
        }]),
    );
    let outcome = orchestrator.submit(payload.clone(), SubmissionMode::Upsert).await;

    assert!(outcome.is_success(), "{:?}", outcome.errors);
    assert_eq!(outcome.flag_level, Some(FlagLevel::Low));
    assert_eq!(
        outcome.report_flags,
        vec![
            "Country [Hungary] was not among the focus countries of ACQUIN; it was added as a cross-border country."
                .to_string()
        ]
    );

    let mut conn = pool.acquire().await.unwrap();
    let focus = find_focus_country(&mut conn, registry.acquin, registry.hungary)
        .await
        .unwrap()
        .unwrap();
    assert!(focus.country_is_crossborder);
    assert!(!focus.country_is_official);
    drop(conn);

    let focus_rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM agency_focus_countries WHERE agency_id = ? AND country_id = ?",
    )
    .bind(registry.acquin)
    .bind(registry.hungary)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(focus_rows, 1);

    // Second pass: the country is a known focus country now
    let outcome = orchestrator.submit(payload, SubmissionMode::Upsert).await;
    assert!(outcome.is_success(), "{:?}", outcome.errors);
    assert_eq!(outcome.flag_level, Some(FlagLevel::None));
    assert_eq!(count_rows(&pool, "agency_focus_countries").await, 4);
}

#[tokio::test]
async fn test_added_focus_country_is_not_official() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    seed_registry(&pool).await.unwrap();
    let orchestrator = test_orchestrator(&pool, EventBus::new(16));

    let mut payload = with_institutions(
        "ACQUIN",
        "R-HU",
        json!([{
            "name_official": "Szegedi Tudományegyetem",
            "locations": [{"country": "HU", "city": "Szeged"}]
        }]),
    );
    payload["status"] = json!("part of obligatory EQA system");
    let outcome = orchestrator.submit(payload, SubmissionMode::Upsert).await;

    assert!(outcome.is_success(), "{:?}", outcome.errors);
    assert_eq!(outcome.flag_level, Some(FlagLevel::High));
    assert_eq!(outcome.report_flags.len(), 2);
    assert!(outcome.report_flags[0].contains("cross-border"));
    assert!(outcome.report_flags[1].contains("does not have official status in [Hungary]"));
}

#[tokio::test]
async fn test_level_keeps_highest_severity() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let registry = seed_registry(&pool).await.unwrap();
    add_institution(&pool, "Universität Wien", registry.austria, Some("Vienna")).await;
    let orchestrator = test_orchestrator(&pool, EventBus::new(16));

    let mut payload = with_institutions("ACQUIN", "R-AT", json!([{"deqar_id": "DEQARINST0001"}]));
    payload["status"] = json!("part of obligatory EQA system");
    file_without_source(&mut payload);
    let outcome = orchestrator.submit(payload, SubmissionMode::Upsert).await;

    assert!(outcome.is_success(), "{:?}", outcome.errors);
    // The LOW file rule runs after the HIGH focus rule
    assert_eq!(outcome.flag_level, Some(FlagLevel::High));
    assert_eq!(outcome.report_flags.len(), 2);
    assert!(outcome.report_flags[1].starts_with("Report file [Summary]"));
}

#[tokio::test]
async fn test_repeated_pass_does_not_duplicate_flags() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let registry = seed_registry(&pool).await.unwrap();
    add_institution(&pool, "Universität Bonn", registry.germany, Some("Bonn")).await;
    let orchestrator = test_orchestrator(&pool, EventBus::new(16));

    let mut payload = with_institutions("ACQUIN", "R-1", json!([{"deqar_id": "DEQARINST0001"}]));
    file_without_source(&mut payload);

    let first = orchestrator.submit(payload.clone(), SubmissionMode::Upsert).await;
    let second = orchestrator.submit(payload, SubmissionMode::Upsert).await;
    assert!(second.is_success(), "{:?}", second.errors);
    assert_eq!(first.report_id, second.report_id);

    let mut conn = pool.acquire().await.unwrap();
    let flags = report_flags(&mut conn, second.report_id.unwrap()).await.unwrap();
    assert_eq!(flags.len(), 1);
    assert!(flags[0].active);
    assert_eq!(flags[0].level(), FlagLevel::Low);
}

#[tokio::test]
async fn test_resolved_condition_deactivates_flag() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let registry = seed_registry(&pool).await.unwrap();
    add_institution(&pool, "Universität Bonn", registry.germany, Some("Bonn")).await;
    let orchestrator = test_orchestrator(&pool, EventBus::new(16));

    let mut broken = with_institutions("ACQUIN", "R-1", json!([{"deqar_id": "DEQARINST0001"}]));
    file_without_source(&mut broken);
    let first = orchestrator.submit(broken, SubmissionMode::Upsert).await;
    assert_eq!(first.flag_level, Some(FlagLevel::Low));

    let fixed = with_institutions("ACQUIN", "R-1", json!([{"deqar_id": "DEQARINST0001"}]));
    let second = orchestrator.submit(fixed, SubmissionMode::Upsert).await;
    assert!(second.is_success(), "{:?}", second.errors);
    assert_eq!(second.flag_level, Some(FlagLevel::None));

    let mut conn = pool.acquire().await.unwrap();
    let report_id = second.report_id.unwrap();
    let flags = report_flags(&mut conn, report_id).await.unwrap();
    assert_eq!(flags.len(), 1);
    assert!(!flags[0].active);
    assert!(active_flags(&mut conn, report_id).await.unwrap().is_empty());
    let report = get_report(&mut conn, report_id).await.unwrap().unwrap();
    assert_eq!(report.flag(), FlagLevel::None);
}

#[tokio::test]
async fn test_flag_removed_by_eqar_stays_inactive() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let registry = seed_registry(&pool).await.unwrap();
    add_institution(&pool, "Universität Bonn", registry.germany, Some("Bonn")).await;
    let orchestrator = test_orchestrator(&pool, EventBus::new(16));

    let mut payload = with_institutions("ACQUIN", "R-1", json!([{"deqar_id": "DEQARINST0001"}]));
    file_without_source(&mut payload);

    let first = orchestrator.submit(payload.clone(), SubmissionMode::Upsert).await;
    let report_id = first.report_id.unwrap();
    {
        let mut conn = pool.acquire().await.unwrap();
        let flags = report_flags(&mut conn, report_id).await.unwrap();
        set_flag_removed_by_eqar(&mut conn, flags[0].id, true).await.unwrap();
    }

    let second = orchestrator.submit(payload.clone(), SubmissionMode::Upsert).await;
    assert!(second.is_success(), "{:?}", second.errors);
    assert_eq!(second.flag_level, Some(FlagLevel::None));
    assert!(second.report_flags.is_empty());

    let flag_id = {
        let mut conn = pool.acquire().await.unwrap();
        let flags = report_flags(&mut conn, report_id).await.unwrap();
        assert_eq!(flags.len(), 1);
        assert!(!flags[0].active);
        assert!(flags[0].removed_by_eqar);

        // Lifting the override lets the next pass decide again
        set_flag_removed_by_eqar(&mut conn, flags[0].id, false).await.unwrap();
        flags[0].id
    };

    let third = orchestrator.submit(payload, SubmissionMode::Upsert).await;
    assert_eq!(third.flag_level, Some(FlagLevel::Low));

    let mut conn = pool.acquire().await.unwrap();
    let flags = report_flags(&mut conn, report_id).await.unwrap();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].id, flag_id);
    assert!(flags[0].active);
}

#[tokio::test]
async fn test_programme_country_outside_institutions_is_low() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let registry = seed_registry(&pool).await.unwrap();
    add_institution(&pool, "Universität Bonn", registry.germany, Some("Bonn")).await;
    let orchestrator = test_orchestrator(&pool, EventBus::new(16));

    let mut payload = with_institutions("ACQUIN", "R-1", json!([{"deqar_id": "DEQARINST0001"}]));
    payload["programmes"] = json!([{
        "name_primary": "Joint Master in European Studies",
        "countries": ["DE", "AT"]
    }]);
    let outcome = orchestrator.submit(payload, SubmissionMode::Upsert).await;

    assert!(outcome.is_success(), "{:?}", outcome.errors);
    assert_eq!(outcome.flag_level, Some(FlagLevel::Low));
    assert_eq!(
        outcome.report_flags,
        vec!["Programme country [Austria] is not among the countries of the institutions in the report.".to_string()]
    );
}

#[tokio::test]
async fn test_programme_level_outside_verified_levels_is_high() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let registry = seed_registry(&pool).await.unwrap();
    add_institution(&pool, "Universität Bonn", registry.germany, Some("Bonn")).await;
    let orchestrator = test_orchestrator(&pool, EventBus::new(16));

    let mut payload = with_institutions(
        "ACQUIN",
        "R-1",
        json!([{"deqar_id": "DEQARINST0001", "qf_ehea_levels": ["first cycle"]}]),
    );
    payload["programmes"] = json!([
        {"name_primary": "BSc Physics", "qf_ehea_level": "first cycle"},
        {"name_primary": "MSc Physics", "qf_ehea_level": "second cycle"}
    ]);
    let outcome = orchestrator.submit(payload, SubmissionMode::Upsert).await;

    assert!(outcome.is_success(), "{:?}", outcome.errors);
    assert_eq!(outcome.flag_level, Some(FlagLevel::High));
    assert_eq!(outcome.report_flags.len(), 1);
    assert!(outcome.report_flags[0].contains("[second cycle]"));
}

#[tokio::test]
async fn test_programme_level_rule_skips_institutions_without_levels() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let registry = seed_registry(&pool).await.unwrap();
    add_institution(&pool, "Universität Bonn", registry.germany, Some("Bonn")).await;
    let orchestrator = test_orchestrator(&pool, EventBus::new(16));

    let mut payload = with_institutions("ACQUIN", "R-1", json!([{"deqar_id": "DEQARINST0001"}]));
    payload["programmes"] = json!([{"name_primary": "MSc Physics", "qf_ehea_level": "second cycle"}]);
    let outcome = orchestrator.submit(payload, SubmissionMode::Upsert).await;

    assert!(outcome.is_success(), "{:?}", outcome.errors);
    assert_eq!(outcome.flag_level, Some(FlagLevel::None));
}

#[tokio::test]
async fn test_extended_rules_are_opt_in() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let registry = seed_registry(&pool).await.unwrap();
    add_institution(&pool, "Universität Bonn", registry.germany, Some("Bonn")).await;

    let mut payload = with_institutions("ACQUIN", "R-OLD", json!([{"deqar_id": "DEQARINST0001"}]));
    payload["valid_from"] = json!("2015-01-01");
    payload["valid_to"] = Value::Null;

    let default_rules = test_orchestrator(&pool, EventBus::new(16));
    let outcome = default_rules.submit(payload.clone(), SubmissionMode::Upsert).await;
    assert!(outcome.is_success(), "{:?}", outcome.errors);
    assert_eq!(outcome.flag_level, Some(FlagLevel::None));

    let mut config = IngestConfig::default();
    config.flagging.extended_rules = true;
    let extended = test_orchestrator_with(&pool, EventBus::new(16), &config);
    let outcome = extended.submit(payload, SubmissionMode::Upsert).await;

    assert!(outcome.is_success(), "{:?}", outcome.errors);
    assert_eq!(outcome.flag_level, Some(FlagLevel::Low));
    assert_eq!(outcome.report_flags.len(), 2);
    assert!(outcome.report_flags[0].contains("older than six years"));
    assert!(outcome.report_flags[1].contains("[DEQARINST0001]"));
    assert!(outcome.report_flags[1].contains("no QF-EHEA levels"));
}

#[tokio::test]
async fn test_conflicts_escalate_as_low_flags() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let registry = seed_registry(&pool).await.unwrap();
    add_institution(&pool, "Universität Bonn", registry.germany, Some("Bonn")).await;
    let orchestrator = test_orchestrator(&pool, EventBus::new(16));

    let payload = with_institutions(
        "ACQUIN",
        "R-1",
        json!([{
            "deqar_id": "DEQARINST0001",
            "name_official": "Rheinische Friedrich-Wilhelms-Universität Bonn",
            "locations": [{"country": "DE", "city": "Siegburg"}]
        }]),
    );
    let outcome = orchestrator.submit(payload, SubmissionMode::Upsert).await;

    assert!(outcome.is_success(), "{:?}", outcome.errors);
    assert_eq!(outcome.flag_level, Some(FlagLevel::Low));
    let escalated: Vec<String> = outcome.institution_log.iter().map(|e| e.message.clone()).collect();
    assert_eq!(outcome.report_flags, escalated);
    assert_eq!(outcome.report_flags.len(), 2);
}

#[tokio::test]
async fn test_unverified_country_flags_every_resubmission() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let registry = seed_registry(&pool).await.unwrap();
    let existing = add_institution(&pool, "Technische Universität München", registry.germany, Some("Munich")).await;
    let orchestrator = test_orchestrator(&pool, EventBus::new(16));

    let payload = with_institutions(
        "ACQUIN",
        "R-1",
        json!([{
            "deqar_id": "DEQARINST0001",
            "locations": [{"country": "AT", "city": "Vienna"}]
        }]),
    );

    let first = orchestrator.submit(payload.clone(), SubmissionMode::Upsert).await;
    assert!(first.is_success(), "{:?}", first.errors);
    assert_eq!(first.flag_level, Some(FlagLevel::Low));
    assert!(first.report_flags[0].contains("awaits verification"));

    let second = orchestrator.submit(payload.clone(), SubmissionMode::Upsert).await;
    assert!(second.is_success(), "{:?}", second.errors);
    assert_eq!(second.report_id, first.report_id);
    assert_eq!(second.flag_level, Some(FlagLevel::Low));
    assert_eq!(
        second.report_flags,
        vec![
            "Country [Austria] submitted by ACQUIN is recorded for the institution but not yet verified."
                .to_string()
        ]
    );

    // Once verified, the condition no longer holds
    sqlx::query("UPDATE institution_countries SET country_verified = 1 WHERE institution_id = ?")
        .bind(existing.id)
        .execute(&pool)
        .await
        .unwrap();
    let third = orchestrator.submit(payload, SubmissionMode::Upsert).await;
    assert!(third.is_success(), "{:?}", third.errors);
    assert_eq!(third.flag_level, Some(FlagLevel::None));
    assert!(third.report_flags.is_empty());

    let report_id = third.report_id.unwrap();
    let mut conn = pool.acquire().await.unwrap();
    assert!(active_flags(&mut conn, report_id).await.unwrap().is_empty());
}
