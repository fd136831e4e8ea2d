//! Data models for roster uploads.
//!
//! Player and history documents are kept as JSON objects so that columns the
//! pipeline does not know about survive a round trip through the store.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::fmt;

/// A stored document: top-level field name to JSON value.
pub type Document = Map<String, Value>;

/// Canonical document keys.
pub mod fields {
    pub const ID: &str = "ID";
    pub const NAME: &str = "Name";
    pub const MIGHT: &str = "might";
    pub const KILLS: &str = "Kills";
    pub const MIGHT_GAINED: &str = "Might Gained";
    pub const KILLS_GAINED: &str = "Kills Gained";
    pub const RANK: &str = "Rank";
    pub const TIER: &str = "T4/T5";
    pub const SIGILS: &str = "Sigils";
    pub const MANA: &str = "Mana";
    pub const DISCORD: &str = "Discord Name";
    pub const NOTES: &str = "Notes";
    pub const HUNTING_STATS: &str = "huntingStats";
    pub const LAST_UPDATED: &str = "lastUpdated";
    pub const SNAPSHOT_TIME: &str = "snapshotTime";

    pub const FIRST_HUNT_TIME: &str = "firstHuntTime";
    pub const LAST_HUNT_TIME: &str = "lastHuntTime";
    pub const HUNTING_LAST_UPDATED: &str = "huntingLastUpdated";
}

/// One data row of an uploaded sheet, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetRow {
    pub cells: Vec<(String, String)>,
    /// Source line the record starts on, when read from CSV text.
    pub line: Option<u64>,
}

impl SheetRow {
    pub fn new(cells: Vec<(String, String)>) -> Self {
        Self { cells, line: None }
    }

    pub fn with_line(mut self, line: Option<u64>) -> Self {
        self.line = line;
        self
    }

    pub fn line_label(&self) -> String {
        self.line.map_or_else(|| "?".to_string(), |line| line.to_string())
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            cells: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            line: None,
        }
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(k, _)| k.as_str())
    }
}

/// Normalized kill-sheet row.
#[derive(Debug, Clone, PartialEq)]
pub struct KillCandidate {
    pub player_id: String,
    /// `None` when the sheet has no name column.
    pub name: Option<String>,
    pub might: f64,
    pub kills: f64,
    pub notes: Option<String>,
    pub rank: Option<String>,
    pub tier: Option<String>,
    pub sigils: Option<f64>,
    pub mana: Option<String>,
    pub discord: Option<String>,
    /// Columns not claimed by any known alias, verbatim.
    pub passthrough: Vec<(String, String)>,
}

/// Hunting counters for one player.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HuntingStats {
    pub total_hunts: f64,
    pub hunt_count: f64,
    pub purchase_count: f64,
    pub hunt_levels: [f64; 5],
    pub purchase_levels: [f64; 5],
    pub points_hunt: f64,
    pub goal_percentage_hunt: f64,
    pub points_purchase: f64,
    pub goal_percentage_purchase: f64,
    pub first_hunt_time: Option<DateTime<Utc>>,
    pub last_hunt_time: Option<DateTime<Utc>>,
}

impl HuntingStats {
    /// Numeric counters paired with their document keys.
    pub fn counters(&self) -> Vec<(&'static str, f64)> {
        const HUNT_KEYS: [&str; 5] = ["l1Hunt", "l2Hunt", "l3Hunt", "l4Hunt", "l5Hunt"];
        const PURCHASE_KEYS: [&str; 5] = [
            "l1Purchase",
            "l2Purchase",
            "l3Purchase",
            "l4Purchase",
            "l5Purchase",
        ];

        let mut counters = vec![
            ("totalHunts", self.total_hunts),
            ("huntCount", self.hunt_count),
            ("purchaseCount", self.purchase_count),
        ];
        counters.extend(HUNT_KEYS.iter().copied().zip(self.hunt_levels));
        counters.extend(PURCHASE_KEYS.iter().copied().zip(self.purchase_levels));
        counters.extend([
            ("pointsHunt", self.points_hunt),
            ("goalPercentageHunt", self.goal_percentage_hunt),
            ("pointsPurchase", self.points_purchase),
            ("goalPercentagePurchase", self.goal_percentage_purchase),
        ]);
        counters
    }

    /// Build the `huntingStats` sub-document, stamped with `updated_at`.
    pub fn to_document(&self, updated_at: DateTime<Utc>) -> Document {
        let mut doc = Document::new();
        for (key, value) in self.counters() {
            doc.insert(key.to_string(), number_value(value));
        }
        doc.insert(
            fields::FIRST_HUNT_TIME.to_string(),
            self.first_hunt_time.map(timestamp_value).unwrap_or(Value::Null),
        );
        doc.insert(
            fields::LAST_HUNT_TIME.to_string(),
            self.last_hunt_time.map(timestamp_value).unwrap_or(Value::Null),
        );
        doc.insert(
            fields::HUNTING_LAST_UPDATED.to_string(),
            timestamp_value(updated_at),
        );
        doc
    }
}

/// Normalized hunting-sheet row.
#[derive(Debug, Clone, PartialEq)]
pub struct HuntingCandidate {
    pub player_id: String,
    pub stats: HuntingStats,
}

/// Outcome of comparing a kill candidate with the stored record.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub might_gained: f64,
    pub kills_gained: f64,
    /// Snapshot of the prior record, present only when a history entry must be written.
    pub history: Option<Document>,
}

impl Reconciliation {
    pub fn should_record_history(&self) -> bool {
        self.history.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetKind {
    Kills,
    Hunting,
}

impl fmt::Display for SheetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetKind::Kills => write!(f, "Kill Sheet"),
            SheetKind::Hunting => write!(f, "Hunting"),
        }
    }
}

/// Summary of one committed upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReport {
    pub sheet: SheetKind,
    /// Every data row read from the sheet, including skipped ones.
    pub rows_processed: usize,
    pub rows_skipped: usize,
    pub players_written: usize,
    pub history_entries: usize,
    pub duplicate_ids: Vec<String>,
}

impl UploadReport {
    pub fn new(sheet: SheetKind) -> Self {
        Self {
            sheet,
            rows_processed: 0,
            rows_skipped: 0,
            players_written: 0,
            history_entries: 0,
            duplicate_ids: Vec::new(),
        }
    }

    pub fn message(&self) -> String {
        match self.sheet {
            SheetKind::Kills => format!(
                "Successfully processed and updated {} players from Kill Sheet.",
                self.rows_processed
            ),
            SheetKind::Hunting => format!(
                "Successfully processed and updated {} players with Hunting data.",
                self.rows_processed
            ),
        }
    }
}

/// Player stats read off a screenshot by the vision model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotStats {
    pub name: String,
    pub might: f64,
    pub kills: f64,
}

/// JSON number for a counter, written as an integer when it has no fractional part.
pub fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::Number(Number::from(value as i64))
    } else {
        Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

pub fn timestamp_value(ts: DateTime<Utc>) -> Value {
    Value::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Read back a timestamp written by [`timestamp_value`].
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_number_value_prefers_integers() {
        assert_eq!(number_value(12345.0), Value::from(12345));
        assert_eq!(number_value(-50.0), Value::from(-50));
        assert_eq!(number_value(12.5), Value::from(12.5));
        assert_eq!(number_value(f64::NAN), Value::Null);
    }

    #[test]
    fn test_timestamp_value_roundtrip() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 13, 45, 0).unwrap();
        let value = timestamp_value(ts);
        assert_eq!(value, Value::from("2024-05-01T13:45:00.000Z"));
        assert_eq!(parse_timestamp(&value), Some(ts));
        assert_eq!(parse_timestamp(&Value::from(17)), None);
    }

    #[test]
    fn test_hunting_document_has_all_fields() {
        let stats = HuntingStats {
            hunt_count: 7.0,
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let doc = stats.to_document(now);

        assert_eq!(doc.len(), 20);
        assert_eq!(doc["huntCount"], Value::from(7));
        assert_eq!(doc["l5Purchase"], Value::from(0));
        assert_eq!(doc[fields::FIRST_HUNT_TIME], Value::Null);
        assert_eq!(doc[fields::HUNTING_LAST_UPDATED], timestamp_value(now));
    }

    #[test]
    fn test_report_message_counts_processed_rows() {
        let mut report = UploadReport::new(SheetKind::Kills);
        report.rows_processed = 3;
        report.rows_skipped = 1;
        assert_eq!(
            report.message(),
            "Successfully processed and updated 3 players from Kill Sheet."
        );
    }
}
