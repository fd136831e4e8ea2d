//! Row extraction: turn parsed sheet rows into normalized candidates.
//!
//! Header lookup tolerates case differences, stray whitespace and synonym
//! headers. Numeric cells go through [`parse_numeric`], which never fails.

use crate::config::AliasOverrides;
use crate::error::Result;
use crate::models::{HuntingCandidate, HuntingStats, KillCandidate, SheetRow};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::fmt;

/// Hunting exports write this for a time that was never set.
pub const UNSET_HUNT_TIME: &str = "1899-12-31 00:00:00";

lazy_static! {
    static ref PLAYER_ID_RE: Regex = Regex::new(r"^\d+$").unwrap();
}

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn extended(mut base: Vec<String>, extra: &[String]) -> Vec<String> {
    base.extend(extra.iter().cloned());
    base
}

/// Accepted headers for each kill-sheet field.
#[derive(Debug, Clone)]
pub struct KillSheetAliases {
    pub player_id: Vec<String>,
    pub name: Vec<String>,
    pub might: Vec<String>,
    pub kills: Vec<String>,
    pub notes: Vec<String>,
    pub rank: Vec<String>,
    pub tier: Vec<String>,
    pub sigils: Vec<String>,
    pub mana: Vec<String>,
    pub discord: Vec<String>,
}

impl Default for KillSheetAliases {
    fn default() -> Self {
        Self {
            player_id: strings(&["ID", "id", "IGG ID", "User ID"]),
            name: strings(&["Name"]),
            might: strings(&["might", "Might"]),
            kills: strings(&["Kills"]),
            notes: strings(&["Notes"]),
            rank: strings(&["Rank"]),
            tier: strings(&["T4/T5", "Tier"]),
            sigils: strings(&["Sigils"]),
            mana: strings(&["Mana"]),
            discord: strings(&["Discord Name", "Discord"]),
        }
    }
}

impl KillSheetAliases {
    pub fn with_overrides(overrides: &AliasOverrides) -> Self {
        let d = Self::default();
        Self {
            player_id: extended(d.player_id, &overrides.player_id),
            name: extended(d.name, &overrides.name),
            might: extended(d.might, &overrides.might),
            kills: extended(d.kills, &overrides.kills),
            notes: extended(d.notes, &overrides.notes),
            rank: extended(d.rank, &overrides.rank),
            tier: extended(d.tier, &overrides.tier),
            sigils: extended(d.sigils, &overrides.sigils),
            mana: extended(d.mana, &overrides.mana),
            discord: extended(d.discord, &overrides.discord),
        }
    }

    fn claims(&self, header: &str) -> bool {
        [
            &self.player_id,
            &self.name,
            &self.might,
            &self.kills,
            &self.notes,
            &self.rank,
            &self.tier,
            &self.sigils,
            &self.mana,
            &self.discord,
        ]
        .iter()
        .any(|aliases| aliases.iter().any(|alias| header_matches(header, alias)))
    }
}

/// Accepted headers for the hunting sheet's player identifier.
#[derive(Debug, Clone)]
pub struct HuntingAliases {
    pub player_id: Vec<String>,
}

impl Default for HuntingAliases {
    fn default() -> Self {
        Self {
            player_id: strings(&["User ID", "ID", "id"]),
        }
    }
}

impl HuntingAliases {
    pub fn with_overrides(overrides: &AliasOverrides) -> Self {
        Self {
            player_id: extended(Self::default().player_id, &overrides.hunting_player_id),
        }
    }
}

/// Why a row was left out of an upload.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    MissingId,
    InvalidId(String),
    MalformedNumber { field: &'static str, value: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingId => write!(f, "missing player ID"),
            SkipReason::InvalidId(id) => write!(f, "invalid player ID {:?}", id),
            SkipReason::MalformedNumber { field, value } => {
                write!(f, "malformed {} value {:?}", field, value)
            }
        }
    }
}

fn header_matches(header: &str, alias: &str) -> bool {
    header == alias || header.trim().to_lowercase() == alias.trim().to_lowercase()
}

/// Look up a cell by the first alias that resolves to a header.
///
/// Each alias is tried as an exact header, then trimmed, then against every
/// header with case and surrounding whitespace ignored. A resolved alias wins
/// even when its cell is empty.
pub fn get_cell_value<'a, S: AsRef<str>>(row: &'a SheetRow, aliases: &[S]) -> Option<&'a str> {
    for alias in aliases {
        let alias = alias.as_ref();
        let trimmed = alias.trim();
        let found = find_cell(row, |h| h == alias)
            .or_else(|| find_cell(row, |h| h == trimmed))
            .or_else(|| find_cell(row, |h| header_matches(h, trimmed)));
        if found.is_some() {
            return found;
        }
    }
    None
}

fn find_cell(row: &SheetRow, pred: impl Fn(&str) -> bool) -> Option<&str> {
    row.cells
        .iter()
        .find(|(header, _)| pred(header.as_str()))
        .map(|(_, value)| value.as_str())
}

/// Longest leading decimal literal (sign, digits, fraction, exponent).
fn leading_float(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        end = frac_end;
    }
    if digits == 0 {
        return None;
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && matches!(bytes[exp_end], b'+' | b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    s[..end].parse().ok()
}

/// Tolerant numeric parse: strips thousands separators and reads the leading
/// number. Empty, absent and malformed cells all read as 0, so a typo in a
/// numeric column is silently recorded as zero.
pub fn parse_numeric(value: Option<&str>) -> f64 {
    let Some(value) = value else {
        return 0.0;
    };
    let cleaned = value.replace(',', "");
    leading_float(cleaned.trim()).unwrap_or(0.0)
}

/// Strict variant: empty or absent reads as 0, anything else must be a complete number.
pub fn parse_numeric_strict(value: Option<&str>) -> Option<f64> {
    let cleaned = value.unwrap_or("").replace(',', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Some(0.0);
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Numeric view of a stored value; strings go through [`parse_numeric`].
pub fn value_as_number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => parse_numeric(Some(s)),
        _ => 0.0,
    }
}

/// Parse a hunting time cell. Empty cells and the unset sentinel are absent.
pub fn parse_hunt_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?.trim();
    if value.is_empty() || value == UNSET_HUNT_TIME {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    tracing::warn!("Unparseable hunt time {:?}, treating as unset", value);
    None
}

fn optional_text<S: AsRef<str>>(row: &SheetRow, aliases: &[S]) -> Option<String> {
    get_cell_value(row, aliases).map(|v| v.trim().to_string())
}

fn read_counter(
    row: &SheetRow,
    aliases: &[String],
    field: &'static str,
    strict: bool,
) -> std::result::Result<f64, SkipReason> {
    let cell = get_cell_value(row, aliases);
    if !strict {
        return Ok(parse_numeric(cell));
    }
    parse_numeric_strict(cell).ok_or_else(|| SkipReason::MalformedNumber {
        field,
        value: cell.unwrap_or_default().to_string(),
    })
}

/// Extract a kill-sheet candidate, or the reason the row must be skipped.
pub fn extract_kill_row(
    row: &SheetRow,
    aliases: &KillSheetAliases,
    strict: bool,
) -> std::result::Result<KillCandidate, SkipReason> {
    let player_id = get_cell_value(row, &aliases.player_id)
        .unwrap_or_default()
        .trim()
        .to_string();
    if player_id.is_empty() {
        return Err(SkipReason::MissingId);
    }
    if !PLAYER_ID_RE.is_match(&player_id) {
        return Err(SkipReason::InvalidId(player_id));
    }

    let might = read_counter(row, &aliases.might, "might", strict)?;
    let kills = read_counter(row, &aliases.kills, "kills", strict)?;

    let passthrough = row
        .cells
        .iter()
        .filter(|(header, _)| !header.trim().is_empty() && !aliases.claims(header))
        .cloned()
        .collect();

    Ok(KillCandidate {
        player_id,
        name: optional_text(row, &aliases.name),
        might,
        kills,
        notes: get_cell_value(row, &aliases.notes).map(str::to_string),
        rank: optional_text(row, &aliases.rank),
        tier: optional_text(row, &aliases.tier),
        sigils: get_cell_value(row, &aliases.sigils).map(|v| parse_numeric(Some(v))),
        mana: optional_text(row, &aliases.mana),
        discord: optional_text(row, &aliases.discord),
        passthrough,
    })
}

/// Extract a hunting-sheet candidate. Only the identifier is required.
pub fn extract_hunting_row(
    row: &SheetRow,
    aliases: &HuntingAliases,
) -> std::result::Result<HuntingCandidate, SkipReason> {
    let player_id = get_cell_value(row, &aliases.player_id)
        .unwrap_or_default()
        .trim()
        .to_string();
    if player_id.is_empty() {
        return Err(SkipReason::MissingId);
    }

    let counter = |header: &str| parse_numeric(get_cell_value(row, &[header]));
    let level = |kind: &str| -> [f64; 5] {
        std::array::from_fn(|i| counter(&format!("L{} ({})", i + 1, kind)))
    };

    let stats = HuntingStats {
        total_hunts: counter("Total"),
        hunt_count: counter("Hunt"),
        purchase_count: counter("Purchase"),
        hunt_levels: level("Hunt"),
        purchase_levels: level("Purchase"),
        points_hunt: counter("Points (Hunt)"),
        goal_percentage_hunt: counter("Goal Percentage (Hunt)"),
        points_purchase: counter("Points (Purchase)"),
        goal_percentage_purchase: counter("Goal Percentage (Purchase)"),
        first_hunt_time: parse_hunt_time(get_cell_value(row, &["First Hunt Time"])),
        last_hunt_time: parse_hunt_time(get_cell_value(row, &["Last Hunt Time"])),
    };

    Ok(HuntingCandidate { player_id, stats })
}

/// Parse CSV text with a header row. Blank lines are ignored; a structural
/// error (such as a row with the wrong number of fields) fails the whole sheet.
pub fn read_sheet_rows(text: &str) -> Result<Vec<SheetRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(text.as_bytes());
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let cells = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.to_string(), v.to_string()))
            .collect();
        rows.push(SheetRow::new(cells).with_line(record.position().map(|p| p.line())));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_numeric_tolerant() {
        assert_eq!(parse_numeric(Some("12,345")), 12345.0);
        assert_eq!(parse_numeric(Some("")), 0.0);
        assert_eq!(parse_numeric(None), 0.0);
        assert_eq!(parse_numeric(Some("abc")), 0.0);
        assert_eq!(parse_numeric(Some("  1,234,567  ")), 1234567.0);
        assert_eq!(parse_numeric(Some("-3.5")), -3.5);
        assert_eq!(parse_numeric(Some("1e3")), 1000.0);
    }

    #[test]
    fn test_parse_numeric_masks_trailing_garbage() {
        // A typo keeps only the leading number; nothing flags it.
        assert_eq!(parse_numeric(Some("12abc")), 12.0);
        assert_eq!(parse_numeric(Some("1.2.3")), 1.2);
        assert_eq!(parse_numeric(Some(".")), 0.0);
        assert_eq!(parse_numeric(Some("inf")), 0.0);
    }

    #[test]
    fn test_parse_numeric_strict() {
        assert_eq!(parse_numeric_strict(Some("12,345")), Some(12345.0));
        assert_eq!(parse_numeric_strict(Some("")), Some(0.0));
        assert_eq!(parse_numeric_strict(None), Some(0.0));
        assert_eq!(parse_numeric_strict(Some("12abc")), None);
        assert_eq!(parse_numeric_strict(Some("NaN")), None);
    }

    #[test]
    fn test_value_as_number() {
        assert_eq!(value_as_number(Some(&Value::from(100))), 100.0);
        assert_eq!(value_as_number(Some(&Value::from("2,500"))), 2500.0);
        assert_eq!(value_as_number(Some(&Value::Bool(true))), 0.0);
        assert_eq!(value_as_number(None), 0.0);
    }

    #[test]
    fn test_get_cell_value_aliases() {
        let row = SheetRow::from_pairs(&[(" id ", "42"), ("MIGHT", "9"), ("Kills", "")]);
        assert_eq!(get_cell_value(&row, &["ID"]), Some("42"));
        assert_eq!(get_cell_value(&row, &["might"]), Some("9"));
        assert_eq!(get_cell_value(&row, &["Kills", "kills"]), Some(""));
        assert_eq!(get_cell_value(&row, &["Name"]), None);
    }

    #[test]
    fn test_get_cell_value_first_alias_wins() {
        let row = SheetRow::from_pairs(&[("id", "1"), ("ID", "2")]);
        assert_eq!(get_cell_value(&row, &["ID", "id"]), Some("2"));
        assert_eq!(get_cell_value(&row, &["id", "ID"]), Some("1"));
    }

    #[test]
    fn test_extract_kill_row() {
        let row = SheetRow::from_pairs(&[
            ("ID", " 1001 "),
            ("Name", "Ada"),
            ("Might", "1,500,000"),
            ("Kills", "2,000"),
            ("Rank", "R4"),
            ("Sigils", "12"),
            ("GF Pass/Fail", "Pass"),
        ]);
        let candidate = extract_kill_row(&row, &KillSheetAliases::default(), false).unwrap();

        assert_eq!(candidate.player_id, "1001");
        assert_eq!(candidate.name.as_deref(), Some("Ada"));
        assert_eq!(candidate.might, 1_500_000.0);
        assert_eq!(candidate.kills, 2000.0);
        assert_eq!(candidate.rank.as_deref(), Some("R4"));
        assert_eq!(candidate.sigils, Some(12.0));
        assert_eq!(candidate.notes, None);
        assert_eq!(candidate.mana, None);
        assert_eq!(
            candidate.passthrough,
            vec![("GF Pass/Fail".to_string(), "Pass".to_string())]
        );
    }

    #[test]
    fn test_extract_kill_row_rejects_bad_ids() {
        let aliases = KillSheetAliases::default();
        let missing = SheetRow::from_pairs(&[("Name", "Ada"), ("might", "5")]);
        assert_eq!(extract_kill_row(&missing, &aliases, false), Err(SkipReason::MissingId));

        let blank = SheetRow::from_pairs(&[("ID", "  ")]);
        assert_eq!(extract_kill_row(&blank, &aliases, false), Err(SkipReason::MissingId));

        let text = SheetRow::from_pairs(&[("ID", "Total")]);
        assert_eq!(
            extract_kill_row(&text, &aliases, false),
            Err(SkipReason::InvalidId("Total".to_string()))
        );
    }

    #[test]
    fn test_extract_kill_row_strict_mode() {
        let aliases = KillSheetAliases::default();
        let row = SheetRow::from_pairs(&[("ID", "7"), ("might", "lots"), ("Kills", "3")]);

        let lenient = extract_kill_row(&row, &aliases, false).unwrap();
        assert_eq!(lenient.might, 0.0);

        assert_eq!(
            extract_kill_row(&row, &aliases, true),
            Err(SkipReason::MalformedNumber {
                field: "might",
                value: "lots".to_string()
            })
        );
    }

    #[test]
    fn test_alias_overrides_extend_defaults() {
        let overrides = AliasOverrides {
            player_id: vec!["Player ID".to_string()],
            ..Default::default()
        };
        let aliases = KillSheetAliases::with_overrides(&overrides);
        let row = SheetRow::from_pairs(&[("Player ID", "55"), ("Name", "Bo")]);
        let candidate = extract_kill_row(&row, &aliases, false).unwrap();
        assert_eq!(candidate.player_id, "55");
        assert!(candidate.passthrough.is_empty());
    }

    #[test]
    fn test_parse_hunt_time_sentinel_is_absent() {
        assert_eq!(parse_hunt_time(Some("1899-12-31 00:00:00")), None);
        assert_eq!(parse_hunt_time(Some("")), None);
        assert_eq!(parse_hunt_time(None), None);
        assert_eq!(parse_hunt_time(Some("not a date")), None);
    }

    #[test]
    fn test_parse_hunt_time_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 13, 45, 0).unwrap();
        assert_eq!(parse_hunt_time(Some("2024-05-01 13:45:00")), Some(expected));
        assert_eq!(parse_hunt_time(Some("2024-05-01T13:45:00Z")), Some(expected));
        assert_eq!(parse_hunt_time(Some("05/01/2024 13:45")), Some(expected));
        assert_eq!(
            parse_hunt_time(Some("2024-05-01")),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_extract_hunting_row() {
        let row = SheetRow::from_pairs(&[
            ("User ID ", "1001"),
            ("Total", "10"),
            ("Hunt", "7"),
            ("Purchase", "3"),
            ("L1 (Hunt) ", "4"),
            ("L5 (Purchase)", "1"),
            ("Goal Percentage (Hunt)", "87.5"),
            ("First Hunt Time", "1899-12-31 00:00:00"),
            ("Last Hunt Time", "2024-05-01 13:45:00"),
        ]);
        let candidate = extract_hunting_row(&row, &HuntingAliases::default()).unwrap();

        assert_eq!(candidate.player_id, "1001");
        assert_eq!(candidate.stats.total_hunts, 10.0);
        assert_eq!(candidate.stats.hunt_count, 7.0);
        assert_eq!(candidate.stats.hunt_levels, [4.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(candidate.stats.purchase_levels[4], 1.0);
        assert_eq!(candidate.stats.goal_percentage_hunt, 87.5);
        assert_eq!(candidate.stats.first_hunt_time, None);
        assert!(candidate.stats.last_hunt_time.is_some());
    }

    #[test]
    fn test_extract_hunting_row_accepts_any_nonempty_id() {
        let aliases = HuntingAliases::default();
        let row = SheetRow::from_pairs(&[("ID", "abc-1")]);
        assert_eq!(extract_hunting_row(&row, &aliases).unwrap().player_id, "abc-1");

        let row = SheetRow::from_pairs(&[("User ID", "")]);
        assert_eq!(extract_hunting_row(&row, &aliases), Err(SkipReason::MissingId));
    }

    #[test]
    fn test_read_sheet_rows() {
        let text = "ID,Name,might\n1,Ada,\"1,000\"\n\n2,Bo,5\n";
        let rows = read_sheet_rows(text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(get_cell_value(&rows[0], &["might"]), Some("1,000"));
        assert_eq!(rows[1].headers().collect::<Vec<_>>(), vec!["ID", "Name", "might"]);
    }

    #[test]
    fn test_read_sheet_rows_track_source_lines() {
        let text = "ID,Name\n1,\"Ada\nLovelace\"\n2,Bo\n";
        let rows = read_sheet_rows(text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(get_cell_value(&rows[0], &["Name"]), Some("Ada\nLovelace"));
        assert_eq!(rows[0].line, Some(2));
        assert_eq!(rows[1].line, Some(4));
        assert_eq!(rows[1].line_label(), "4");
        assert_eq!(SheetRow::from_pairs(&[("ID", "1")]).line_label(), "?");
    }

    #[test]
    fn test_read_sheet_rows_structural_error() {
        let text = "ID,Name,might\n1,Ada\n";
        assert!(read_sheet_rows(text).is_err());
    }
}
