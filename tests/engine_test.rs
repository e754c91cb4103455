//! Integration tests for the sorter engine.

use chrono::{DateTime, Duration, TimeZone, Utc};
use sortq::engine::Engine;
use sortq::error::Error;
use sortq::event::EventKind;
use sortq::model::*;

const TEAM: &str = "team-1";

fn test_engine() -> Engine {
    Engine::in_memory().expect("failed to create in-memory engine")
}

fn member(team: &str, user: &str) -> Identity {
    Identity::new(team, user, "", Role::Member)
}

fn admin(team: &str, user: &str) -> Identity {
    Identity::new(team, user, "", Role::Admin)
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn claim_at(
    engine: &Engine,
    identity: &Identity,
    count: u32,
    now: DateTime<Utc>,
) -> sortq::error::Result<ClaimOutcome> {
    engine.claim(
        identity,
        ClaimRequest {
            requested_count: count,
            now,
        },
    )
}

// ---------------------------------------------------------------------------
// Submission and dedup
// ---------------------------------------------------------------------------

#[test]
fn enqueue_adds_unique_lines_and_reports_duplicates() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    let outcome = engine.enqueue(&user, "alpha\nbeta\nAlpha").unwrap();
    assert_eq!(outcome.added.len(), 2);
    assert_eq!(outcome.submitted, 3);
    assert_eq!(outcome.duplicates(), 1);

    let queue = engine.list_queue(&user).unwrap();
    assert_eq!(queue.len(), 2);
}

#[test]
fn enqueue_empty_input_is_validation_error() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    assert!(matches!(
        engine.enqueue(&user, ""),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        engine.enqueue(&user, "   \n  \n"),
        Err(Error::Validation(_))
    ));
}

#[test]
fn enqueue_drops_blank_lines() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    let outcome = engine.enqueue(&user, "alpha\n\n   \nbeta\n").unwrap();
    assert_eq!(outcome.added.len(), 2);
    assert_eq!(outcome.submitted, 2);
}

#[test]
fn enqueue_excludes_queued_and_claimed_content() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    // "x" goes through the queue into history; "y" stays queued.
    engine.enqueue(&user, "x").unwrap();
    claim_at(&engine, &user, 1, t0()).unwrap();
    engine.enqueue(&user, "y").unwrap();

    let outcome = engine.enqueue(&user, "x\ny\nz").unwrap();
    assert_eq!(outcome.added.len(), 1);
    assert_eq!(outcome.added[0].content, "z");
    assert_eq!(outcome.duplicates(), 2);
}

#[test]
fn all_duplicate_batch_succeeds_with_zero_added() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    engine.enqueue(&user, "only line").unwrap();
    let outcome = engine.enqueue(&user, "only line").unwrap();

    assert!(outcome.added.is_empty());
    assert_eq!(outcome.submitted, 1);
    assert_eq!(outcome.duplicates(), 1);
}

#[test]
fn preview_reports_survivors_without_enqueueing() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    engine.enqueue(&user, "existing").unwrap();

    let report = engine.preview(&user, "existing\nbrand new").unwrap();
    assert_eq!(report.unique, vec!["brand new"]);

    // Nothing was added by the preview.
    assert_eq!(engine.list_queue(&user).unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[test]
fn list_queue_is_newest_first() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    engine.enqueue(&user, "a\nb\nc").unwrap();

    let queue = engine.list_queue(&user).unwrap();
    let contents: Vec<_> = queue.iter().map(|l| l.content.as_str()).collect();
    assert_eq!(contents, vec!["c", "b", "a"]);
}

#[test]
fn remove_line_deletes_a_single_entry() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    let outcome = engine.enqueue(&user, "keep\ndrop").unwrap();
    let drop_id = outcome
        .added
        .iter()
        .find(|l| l.content == "drop")
        .expect("line was added")
        .id;

    engine.remove_line(&user, drop_id).unwrap();

    let queue = engine.list_queue(&user).unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].content, "keep");
}

#[test]
fn remove_is_team_scoped() {
    let engine = test_engine();
    let alpha = member("alpha", "u1");
    let beta = member("beta", "u2");

    let outcome = engine.enqueue(&alpha, "alpha's line").unwrap();
    let id = outcome.added[0].id;

    // A caller from another team cannot delete it, even with the id.
    assert!(matches!(
        engine.remove_line(&beta, id),
        Err(Error::NotFound(_))
    ));
    assert_eq!(engine.list_queue(&alpha).unwrap().len(), 1);
}

#[test]
fn remove_unknown_line_is_not_found() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    assert!(matches!(
        engine.remove_line(&user, LineId::new()),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn clear_queue_requires_admin() {
    let engine = test_engine();
    let user = member(TEAM, "u1");
    let boss = admin(TEAM, "u2");

    engine.enqueue(&user, "a\nb").unwrap();

    assert!(matches!(
        engine.clear_queue(&user),
        Err(Error::PermissionDenied(_))
    ));
    assert_eq!(engine.list_queue(&user).unwrap().len(), 2);

    let removed = engine.clear_queue(&boss).unwrap();
    assert_eq!(removed, 2);
    assert!(engine.list_queue(&user).unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Claim
// ---------------------------------------------------------------------------

#[test]
fn claim_moves_fifo_batch_into_history() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    engine.enqueue(&user, "a\nb\nc\nd\ne").unwrap();

    let outcome = claim_at(&engine, &user, 3, t0()).unwrap();
    assert_eq!(outcome.claimed_count, 3);

    // Oldest first: a, b, c.
    let claimed: Vec<_> = outcome.lines.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(claimed, vec!["a", "b", "c"]);

    // All entries share the claim instant and preserve provenance.
    for entry in &outcome.lines {
        assert_eq!(entry.claimed_at, t0());
        assert_eq!(entry.original_added_by.as_str(), "u1");
        assert_eq!(entry.claimed_by.as_str(), "u1");
    }

    // Queue shrank by exactly the claimed lines; nothing is in both.
    let queue = engine.list_queue(&user).unwrap();
    let remaining: Vec<_> = queue.iter().map(|l| l.content.as_str()).collect();
    assert_eq!(remaining, vec!["e", "d"]);

    let history = engine.list_history(&user, None).unwrap();
    assert_eq!(history.len(), 3);
    for entry in &history {
        assert!(!remaining.contains(&entry.content.as_str()));
    }
}

#[test]
fn partial_claim_succeeds() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    engine.enqueue(&user, "a\nb").unwrap();

    let outcome = claim_at(&engine, &user, 5, t0()).unwrap();
    assert_eq!(outcome.claimed_count, 2);
    assert!(engine.list_queue(&user).unwrap().is_empty());
}

#[test]
fn empty_claim_fails_with_no_lines_available() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    assert!(matches!(
        claim_at(&engine, &user, 3, t0()),
        Err(Error::NoLinesAvailable)
    ));
    assert!(engine.list_history(&user, None).unwrap().is_empty());
}

#[test]
fn claim_count_is_validated() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    engine.enqueue(&user, "a").unwrap();

    assert!(matches!(
        claim_at(&engine, &user, 0, t0()),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        claim_at(&engine, &user, 16, t0()),
        Err(Error::Validation(_))
    ));
}

#[test]
fn configured_lines_per_claim_caps_the_request() {
    let engine = test_engine();
    let user = member(TEAM, "u1");
    let boss = admin(TEAM, "u2");

    engine
        .update_settings(
            &boss,
            SettingsPatch {
                lines_per_claim: Some(2),
                cooldown_minutes: None,
            },
        )
        .unwrap();

    engine.enqueue(&user, "a\nb\nc\nd\ne").unwrap();

    let outcome = claim_at(&engine, &user, 5, t0()).unwrap();
    assert_eq!(outcome.claimed_count, 2);
    assert_eq!(engine.list_queue(&user).unwrap().len(), 3);
}

#[test]
fn claim_records_display_name_with_user_id_fallback() {
    let engine = test_engine();
    let named = Identity::new(TEAM, "u1", "Ada L", Role::Member);
    let unnamed = member(TEAM, "u2");

    engine.enqueue(&named, "first\nsecond").unwrap();

    let first = claim_at(&engine, &named, 1, t0()).unwrap();
    assert_eq!(first.lines[0].claimed_by_name, "Ada L");

    let second = claim_at(&engine, &unnamed, 1, t0()).unwrap();
    assert_eq!(second.lines[0].claimed_by_name, "u2");
}

#[test]
fn claim_is_team_scoped() {
    let engine = test_engine();
    let alpha = member("alpha", "u1");
    let beta = member("beta", "u2");

    engine.enqueue(&alpha, "alpha's line").unwrap();

    assert!(matches!(
        claim_at(&engine, &beta, 1, t0()),
        Err(Error::NoLinesAvailable)
    ));
    assert_eq!(engine.list_queue(&alpha).unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Cooldown
// ---------------------------------------------------------------------------

#[test]
fn cooldown_blocks_early_second_claim() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    engine.enqueue(&user, "a\nb\nc\nd").unwrap();
    claim_at(&engine, &user, 2, t0()).unwrap();

    // Default cooldown is 5 minutes; one minute in, 4 minutes remain.
    match claim_at(&engine, &user, 2, t0() + Duration::minutes(1)) {
        Err(Error::CooldownActive { remaining_secs }) => assert_eq!(remaining_secs, 240),
        other => panic!("expected CooldownActive, got {other:?}"),
    }

    // The blocked attempt claimed nothing.
    assert_eq!(engine.list_queue(&user).unwrap().len(), 2);
}

#[test]
fn claim_allowed_once_cooldown_elapses() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    engine.enqueue(&user, "a\nb").unwrap();
    claim_at(&engine, &user, 1, t0()).unwrap();

    let outcome = claim_at(&engine, &user, 1, t0() + Duration::minutes(5)).unwrap();
    assert_eq!(outcome.claimed_count, 1);
}

#[test]
fn cooldown_is_per_user() {
    let engine = test_engine();
    let first = member(TEAM, "u1");
    let second = member(TEAM, "u2");

    engine.enqueue(&first, "a\nb").unwrap();

    claim_at(&engine, &first, 1, t0()).unwrap();
    let outcome = claim_at(&engine, &second, 1, t0()).unwrap();
    assert_eq!(outcome.claimed_count, 1);
}

#[test]
fn cooldown_respects_updated_settings() {
    let engine = test_engine();
    let user = member(TEAM, "u1");
    let boss = admin(TEAM, "u2");

    engine
        .update_settings(
            &boss,
            SettingsPatch {
                lines_per_claim: None,
                cooldown_minutes: Some(1),
            },
        )
        .unwrap();

    engine.enqueue(&user, "a\nb\nc").unwrap();
    claim_at(&engine, &user, 1, t0()).unwrap();

    match claim_at(&engine, &user, 1, t0() + Duration::seconds(30)) {
        Err(Error::CooldownActive { remaining_secs }) => assert_eq!(remaining_secs, 30),
        other => panic!("expected CooldownActive, got {other:?}"),
    }

    claim_at(&engine, &user, 1, t0() + Duration::seconds(60)).unwrap();
}

#[test]
fn failed_claim_does_not_start_a_cooldown() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    // Nothing queued: the attempt fails and must leave no claim mark.
    assert!(matches!(
        claim_at(&engine, &user, 1, t0()),
        Err(Error::NoLinesAvailable)
    ));

    engine.enqueue(&user, "a").unwrap();
    let outcome = claim_at(&engine, &user, 1, t0() + Duration::seconds(1)).unwrap();
    assert_eq!(outcome.claimed_count, 1);
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[test]
fn history_lists_newest_claim_first_in_queue_order() {
    let engine = test_engine();
    let first = member(TEAM, "u1");
    let second = member(TEAM, "u2");

    engine.enqueue(&first, "a\nb\nc").unwrap();

    claim_at(&engine, &first, 1, t0()).unwrap();
    claim_at(&engine, &second, 2, t0() + Duration::minutes(10)).unwrap();

    let history = engine.list_history(&first, None).unwrap();
    let contents: Vec<_> = history.iter().map(|e| e.content.as_str()).collect();
    // Latest claim first; within one claim, queue order.
    assert_eq!(contents, vec!["b", "c", "a"]);

    let limited = engine.list_history(&first, Some(2)).unwrap();
    assert_eq!(limited.len(), 2);
}

#[test]
fn history_search_is_case_insensitive_substring() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    engine
        .enqueue(&user, "Fix the Widget rendering\nUnrelated chore")
        .unwrap();
    claim_at(&engine, &user, 2, t0()).unwrap();

    let hits = engine.search_history(&user, "widget").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].content, "Fix the Widget rendering");

    assert!(
        engine
            .search_history(&user, "nonexistent")
            .unwrap()
            .is_empty()
    );
}

#[test]
fn history_search_folds_case_beyond_ascii() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    engine.enqueue(&user, "Fahre ÜBER die Brücke").unwrap();
    claim_at(&engine, &user, 1, t0()).unwrap();

    let hits = engine.search_history(&user, "über").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].content, "Fahre ÜBER die Brücke");
}

#[test]
fn history_is_team_scoped() {
    let engine = test_engine();
    let alpha = member("alpha", "u1");
    let beta = member("beta", "u2");

    engine.enqueue(&alpha, "secret plan").unwrap();
    claim_at(&engine, &alpha, 1, t0()).unwrap();

    assert!(engine.list_history(&beta, None).unwrap().is_empty());
    assert!(engine.search_history(&beta, "secret").unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[test]
fn settings_default_when_absent() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    let settings = engine.get_settings(&user).unwrap();
    assert_eq!(settings.team_id.as_str(), TEAM);
    assert_eq!(settings.lines_per_claim, DEFAULT_LINES_PER_CLAIM);
    assert_eq!(settings.cooldown_minutes, DEFAULT_COOLDOWN_MINUTES);
}

#[test]
fn settings_update_requires_admin() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    let result = engine.update_settings(
        &user,
        SettingsPatch {
            lines_per_claim: Some(10),
            cooldown_minutes: None,
        },
    );
    assert!(matches!(result, Err(Error::PermissionDenied(_))));

    let settings = engine.get_settings(&user).unwrap();
    assert_eq!(settings.lines_per_claim, DEFAULT_LINES_PER_CLAIM);
}

#[test]
fn settings_rejects_out_of_range_values() {
    let engine = test_engine();
    let boss = admin(TEAM, "u1");

    for patch in [
        SettingsPatch {
            lines_per_claim: Some(0),
            cooldown_minutes: None,
        },
        SettingsPatch {
            lines_per_claim: Some(16),
            cooldown_minutes: None,
        },
        SettingsPatch {
            lines_per_claim: None,
            cooldown_minutes: Some(0),
        },
        SettingsPatch {
            lines_per_claim: None,
            cooldown_minutes: Some(2000),
        },
    ] {
        assert!(matches!(
            engine.update_settings(&boss, patch),
            Err(Error::Validation(_))
        ));
    }

    // Stored settings remain untouched.
    let settings = engine.get_settings(&boss).unwrap();
    assert_eq!(settings.lines_per_claim, DEFAULT_LINES_PER_CLAIM);
    assert_eq!(settings.cooldown_minutes, DEFAULT_COOLDOWN_MINUTES);
}

#[test]
fn settings_upsert_merges_partial_patches() {
    let engine = test_engine();
    let boss = admin(TEAM, "u1");

    engine
        .update_settings(
            &boss,
            SettingsPatch {
                lines_per_claim: Some(10),
                cooldown_minutes: None,
            },
        )
        .unwrap();
    engine
        .update_settings(
            &boss,
            SettingsPatch {
                lines_per_claim: None,
                cooldown_minutes: Some(30),
            },
        )
        .unwrap();

    let settings = engine.get_settings(&boss).unwrap();
    assert_eq!(settings.lines_per_claim, 10);
    assert_eq!(settings.cooldown_minutes, 30);
}

#[test]
fn settings_are_team_scoped() {
    let engine = test_engine();
    let alpha_boss = admin("alpha", "u1");
    let beta_user = member("beta", "u2");

    engine
        .update_settings(
            &alpha_boss,
            SettingsPatch {
                lines_per_claim: Some(15),
                cooldown_minutes: None,
            },
        )
        .unwrap();

    let beta_settings = engine.get_settings(&beta_user).unwrap();
    assert_eq!(beta_settings.lines_per_claim, DEFAULT_LINES_PER_CLAIM);
}

// ---------------------------------------------------------------------------
// Identity validation
// ---------------------------------------------------------------------------

#[test]
fn blank_identity_fields_are_rejected() {
    let engine = test_engine();

    let no_team = Identity::new("", "u1", "", Role::Member);
    assert!(matches!(
        engine.enqueue(&no_team, "a"),
        Err(Error::Validation(_))
    ));

    let no_user = Identity::new(TEAM, "   ", "", Role::Member);
    assert!(matches!(
        engine.list_queue(&no_user),
        Err(Error::Validation(_))
    ));
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[test]
fn events_are_recorded_with_monotonic_seq() {
    let engine = test_engine();
    let user = member(TEAM, "u1");
    let boss = admin(TEAM, "u2");

    engine.enqueue(&user, "a\nb").unwrap();
    claim_at(&engine, &user, 1, t0()).unwrap();
    engine
        .update_settings(
            &boss,
            SettingsPatch {
                lines_per_claim: Some(3),
                cooldown_minutes: None,
            },
        )
        .unwrap();

    let events = engine.get_events_since(0).unwrap();
    assert!(events.len() >= 3);

    for window in events.windows(2) {
        assert!(window[1].seq > window[0].seq);
    }

    assert!(
        events
            .iter()
            .any(|e| matches!(e.kind, EventKind::LinesQueued { count: 2, .. }))
    );
    assert!(
        events
            .iter()
            .any(|e| matches!(e.kind, EventKind::LinesClaimed { count: 1, .. }))
    );
    assert!(
        events
            .iter()
            .any(|e| matches!(e.kind, EventKind::SettingsUpdated { .. }))
    );
}

#[test]
fn get_events_since_filters_by_seq() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    engine.enqueue(&user, "a").unwrap();
    engine.enqueue(&user, "b").unwrap();

    let all = engine.get_events_since(0).unwrap();
    assert_eq!(all.len(), 2);

    let later = engine.get_events_since(all[0].seq).unwrap();
    assert_eq!(later.len(), 1);
    assert_eq!(later[0].seq, all[1].seq);
}

#[test]
fn events_since_beyond_any_seq_returns_nothing() {
    let engine = test_engine();
    let user = member(TEAM, "u1");

    engine.enqueue(&user, "a").unwrap();

    assert!(engine.get_events_since(u64::MAX).unwrap().is_empty());
}
