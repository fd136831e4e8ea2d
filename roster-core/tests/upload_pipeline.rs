use chrono::{DateTime, TimeZone, Utc};
use roster_core::config::{DuplicatePolicy, RosterConfig};
use roster_core::export::{flatten_player, players_to_xlsx};
use roster_core::file_utils::read_sheet_file;
use roster_core::models::SheetKind;
use roster_core::store::{DocumentStore, MemoryStore, SqliteStore};
use roster_core::upload::{failure_message, Uploader};
use roster_core::RosterError;
use serde_json::{json, Value};
use std::io::Write;

const KILLS_DAY_ONE: &str = "\
ID,Name,might,Kills,Rank,Notes,GF Pass/Fail
1001,Ada,100,10,R4,,Pass
1002,Brann,5000,70,R2,new recruit,Fail
";

const KILLS_DAY_TWO: &str = "\
IGG ID,Name,Might,Kills,Rank
1001,Ada,\"150\",10,R5
1002,Brann,\"5,000\",70,R2
";

const HUNTING: &str = "\
User ID,Total,Hunt,Purchase,L1 (Hunt),L2 (Hunt),L3 (Hunt),L4 (Hunt),L5 (Hunt),L1 (Purchase),L2 (Purchase),L3 (Purchase),L4 (Purchase),L5 (Purchase),Points (Hunt),Goal Percentage (Hunt),Points (Purchase),Goal Percentage (Purchase),First Hunt Time,Last Hunt Time
1001,12,7,5,1,2,3,1,0,5,0,0,0,0,340,85,120,40,2024-05-30 08:15:00,1899-12-31 00:00:00
";

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, 12, 0, 0).unwrap()
}

fn memory_uploader() -> Uploader<MemoryStore> {
    Uploader::new(MemoryStore::new(), RosterConfig::default())
}

fn player(up: &Uploader<impl DocumentStore>, id: &str) -> serde_json::Map<String, Value> {
    up.store()
        .get(&up.scope().player(id))
        .unwrap()
        .expect("player stored")
}

#[test]
fn kill_then_hunting_then_kill_keeps_independent_fields() {
    let up = memory_uploader();

    let report = up.process_kill_sheet_at(KILLS_DAY_ONE, at(1)).unwrap();
    assert_eq!(report.rows_processed, 2);
    assert_eq!(report.history_entries, 0);
    up.save_note_at("1001", "veteran", at(1)).unwrap();

    let report = up.process_hunting_sheet_at(HUNTING, at(2)).unwrap();
    assert_eq!(
        report.message(),
        "Successfully processed and updated 1 players with Hunting data."
    );

    let ada = player(&up, "1001");
    assert_eq!(ada["Notes"], json!("veteran"));
    assert_eq!(ada["might"], json!(100));
    assert_eq!(ada["Kills"], json!(10));
    assert_eq!(ada["huntingStats"]["huntCount"], json!(7));
    assert_eq!(ada["huntingStats"]["firstHuntTime"], json!("2024-05-30T08:15:00.000Z"));
    assert_eq!(ada["huntingStats"]["lastHuntTime"], Value::Null);

    let report = up.process_kill_sheet_at(KILLS_DAY_TWO, at(3)).unwrap();
    assert_eq!(report.history_entries, 1);

    let ada = player(&up, "1001");
    assert_eq!(ada["might"], json!(150));
    assert_eq!(ada["Might Gained"], json!(50));
    assert_eq!(ada["Kills Gained"], json!(0));
    assert_eq!(ada["Rank"], json!("R5"));
    assert_eq!(ada["Notes"], json!("veteran"));
    assert_eq!(ada["GF Pass/Fail"], json!("Pass"));
    assert_eq!(ada["huntingStats"]["huntCount"], json!(7));

    let history = up.player_history("1001").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["might"], json!(100));
    assert_eq!(history[0]["Kills"], json!(10));

    let brann = player(&up, "1002");
    assert_eq!(brann["Might Gained"], json!(0));
    assert_eq!(brann["Notes"], json!("new recruit"));
    assert!(up.player_history("1002").unwrap().is_empty());
}

#[test]
fn kill_sheet_without_name_column_keeps_stored_name() {
    let up = memory_uploader();
    up.process_kill_sheet_at("ID,Name,might,Kills\n1001,Ada,100,10\n", at(1))
        .unwrap();
    up.process_kill_sheet_at("ID,might,Kills\n1001,150,10\n2002,5,1\n", at(2))
        .unwrap();

    let ada = player(&up, "1001");
    assert_eq!(ada["Name"], json!("Ada"));
    assert_eq!(ada["might"], json!(150));
    assert_eq!(ada["Might Gained"], json!(50));
    assert_eq!(player(&up, "2002")["Name"], json!(""));
}

#[test]
fn commit_failure_applies_nothing() {
    let up = memory_uploader();
    up.process_kill_sheet_at(KILLS_DAY_ONE, at(1)).unwrap();
    let before = up.list_players().unwrap();

    up.store().fail_next_commit();
    let err = up.process_kill_sheet_at(KILLS_DAY_TWO, at(2)).unwrap_err();

    assert!(matches!(err, RosterError::Store(_)));
    assert!(failure_message(SheetKind::Kills, &err).starts_with("Error updating players: "));
    assert_eq!(up.list_players().unwrap(), before);
    assert!(up.player_history("1001").unwrap().is_empty());
}

#[test]
fn structural_csv_error_reads_and_writes_nothing() {
    let up = memory_uploader();
    let err = up
        .process_kill_sheet_at("ID,Name,might,Kills\n1001,Ada,100\n", at(1))
        .unwrap_err();

    assert!(matches!(err, RosterError::Csv(_)));
    assert!(failure_message(SheetKind::Kills, &err).starts_with("Error parsing Kill Sheet CSV: "));
    assert_eq!(up.store().read_count(), 0);
    assert_eq!(up.store().commit_count(), 0);
}

#[test]
fn strict_mode_skips_malformed_counters() {
    let mut config = RosterConfig::default();
    config.strict_numbers = true;
    let up = Uploader::new(MemoryStore::new(), config);

    let report = up
        .process_kill_sheet_at("ID,Name,might,Kills\n1,Ada,12x,1\n2,Brann,1,\n", at(1))
        .unwrap();
    assert_eq!(report.rows_skipped, 1);
    assert_eq!(up.list_players().unwrap().len(), 1);

    let lenient = memory_uploader();
    let report = lenient
        .process_kill_sheet_at("ID,Name,might,Kills\n1,Ada,abc,1\n", at(1))
        .unwrap();
    assert_eq!(report.rows_skipped, 0);
    assert_eq!(player(&lenient, "1")["might"], json!(0));
}

#[test]
fn reject_policy_refuses_hunting_duplicates() {
    let mut config = RosterConfig::default();
    config.duplicate_ids = DuplicatePolicy::Reject;
    let up = Uploader::new(MemoryStore::new(), config);

    let err = up
        .process_hunting_sheet_at("User ID,Hunt\n7,1\n7,2\n", at(1))
        .unwrap_err();
    assert!(failure_message(SheetKind::Hunting, &err).starts_with("Error parsing Hunting CSV: "));
    assert_eq!(up.store().commit_count(), 0);
}

#[test]
fn configured_aliases_extend_defaults() {
    let config = RosterConfig::from_str(
        r#"
[aliases]
player_id = ["Player ID"]
might = ["Power"]
"#,
    )
    .unwrap();
    let up = Uploader::new(MemoryStore::new(), config);

    up.process_kill_sheet_at("Player ID,Name,Power,Kills\n55,Ada,900,3\n", at(1))
        .unwrap();
    let ada = player(&up, "55");
    assert_eq!(ada["might"], json!(900));
    assert!(!ada.contains_key("Power"));
}

#[test]
fn sqlite_store_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(&dir.path().join("roster.sqlite")).unwrap();
    let up = Uploader::new(store, RosterConfig::default());

    up.process_kill_sheet_at(KILLS_DAY_ONE, at(1)).unwrap();
    up.process_hunting_sheet_at(HUNTING, at(2)).unwrap();
    up.process_kill_sheet_at(KILLS_DAY_TWO, at(3)).unwrap();
    up.process_kill_sheet_at(KILLS_DAY_TWO, at(4)).unwrap();

    assert_eq!(up.player_history("1001").unwrap().len(), 1);

    let players = up.list_players().unwrap();
    assert_eq!(players.len(), 2);
    let row = flatten_player(&players[0], &Utc);
    assert_eq!(row["Hunting: huntCount"], json!(7));
    assert_eq!(row["Might Gained"], json!(0));

    let bytes = players_to_xlsx(&players, &Utc).unwrap();
    assert!(!bytes.is_empty());
}

#[test]
fn windows_1252_sheet_upload() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"ID,Name,might,Kills\n1001,Zo\xEB,10,1\n").unwrap();

    let up = memory_uploader();
    let text = read_sheet_file(file.path()).unwrap();
    up.process_kill_sheet_at(&text, at(1)).unwrap();

    assert_eq!(player(&up, "1001")["Name"], json!("Zoë"));
}
