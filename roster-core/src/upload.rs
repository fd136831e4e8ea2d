//! Upload pipeline: extraction, reconciliation and one batched commit per sheet.

use crate::config::{DuplicatePolicy, RosterConfig};
use crate::error::{Result, RosterError};
use crate::extraction::{
    extract_hunting_row, extract_kill_row, read_sheet_rows, HuntingAliases, KillSheetAliases,
};
use crate::merge::{hunting_patch, merge_kill_document, note_patch};
use crate::models::{fields, parse_timestamp, Document, SheetKind, UploadReport};
use crate::reconcile::reconcile_kill;
use crate::store::{DocumentStore, Scope, WriteBatch};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// User-facing text for a failed upload, worded by the stage that failed.
pub fn failure_message(sheet: SheetKind, err: &RosterError) -> String {
    let parse_stage = matches!(
        err,
        RosterError::Io(_)
            | RosterError::Csv(_)
            | RosterError::Parse(_)
            | RosterError::DuplicateEntry(_)
    );
    match (sheet, parse_stage) {
        (SheetKind::Kills, true) => format!("Error parsing Kill Sheet CSV: {}", err),
        (SheetKind::Hunting, true) => format!("Error parsing Hunting CSV: {}", err),
        (SheetKind::Kills, false) => format!("Error updating players: {}", err),
        (SheetKind::Hunting, false) => format!("Error updating hunting data: {}", err),
    }
}

/// Identifiers appearing on more than one row, in first-seen order.
fn repeated_ids<'a>(ids: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    let mut order = Vec::new();
    for id in ids {
        let count = seen.entry(id).or_insert(0);
        *count += 1;
        if *count == 2 {
            order.push(id.to_string());
        }
    }
    order
}

/// Numeric identifiers first, by value; anything else after them, lexically.
fn compare_player_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u128>().ok(), b.parse::<u128>().ok()) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Runs roster operations against one store for one configured scope.
pub struct Uploader<S> {
    store: S,
    config: RosterConfig,
    scope: Scope,
    kill_aliases: KillSheetAliases,
    hunting_aliases: HuntingAliases,
}

impl<S: DocumentStore> Uploader<S> {
    pub fn new(store: S, config: RosterConfig) -> Self {
        Self {
            scope: config.scope(),
            kill_aliases: KillSheetAliases::with_overrides(&config.aliases),
            hunting_aliases: HuntingAliases::with_overrides(&config.aliases),
            store,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &RosterConfig {
        &self.config
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn process_kill_sheet(&self, text: &str) -> Result<UploadReport> {
        self.process_kill_sheet_at(text, Utc::now())
    }

    /// Reconcile every kill-sheet row against the stored players and commit
    /// all player merges and history inserts as one batch.
    pub fn process_kill_sheet_at(&self, text: &str, now: DateTime<Utc>) -> Result<UploadReport> {
        let rows = read_sheet_rows(text)?;
        let mut report = UploadReport::new(SheetKind::Kills);
        report.rows_processed = rows.len();

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            match extract_kill_row(row, &self.kill_aliases, self.config.strict_numbers) {
                Ok(candidate) => candidates.push(candidate),
                Err(reason) => {
                    tracing::warn!("Skipping kill sheet row at line {}: {}", row.line_label(), reason);
                    report.rows_skipped += 1;
                }
            }
        }

        report.duplicate_ids = repeated_ids(candidates.iter().map(|c| c.player_id.as_str()));
        self.check_duplicates(&report.duplicate_ids)?;

        let mut batch = WriteBatch::new();
        for candidate in &candidates {
            let path = self.scope.player(&candidate.player_id);
            let prior = self.store.get(&path)?;
            let reconciliation = reconcile_kill(candidate, prior.as_ref(), now);

            tracing::debug!(
                "Player {}: might {:+}, kills {:+}",
                candidate.player_id,
                reconciliation.might_gained,
                reconciliation.kills_gained
            );

            let doc = merge_kill_document(candidate, prior.as_ref(), &reconciliation, now);
            if let Some(history) = reconciliation.history {
                batch.queue_insert(&self.scope.history(&candidate.player_id), history);
                report.history_entries += 1;
            }
            batch.queue_merge(path, doc);
            report.players_written += 1;
        }

        self.store.commit(batch)?;
        tracing::info!(
            "Kill sheet committed: {} rows, {} skipped, {} history entries",
            report.rows_processed,
            report.rows_skipped,
            report.history_entries
        );
        Ok(report)
    }

    pub fn process_hunting_sheet(&self, text: &str) -> Result<UploadReport> {
        self.process_hunting_sheet_at(text, Utc::now())
    }

    /// Replace `huntingStats` on every listed player, leaving all other fields alone.
    pub fn process_hunting_sheet_at(&self, text: &str, now: DateTime<Utc>) -> Result<UploadReport> {
        let rows = read_sheet_rows(text)?;
        let mut report = UploadReport::new(SheetKind::Hunting);
        report.rows_processed = rows.len();

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            match extract_hunting_row(row, &self.hunting_aliases) {
                Ok(candidate) => candidates.push(candidate),
                Err(reason) => {
                    tracing::warn!("Skipping hunting row at line {}: {}", row.line_label(), reason);
                    report.rows_skipped += 1;
                }
            }
        }

        report.duplicate_ids = repeated_ids(candidates.iter().map(|c| c.player_id.as_str()));
        self.check_duplicates(&report.duplicate_ids)?;

        let mut batch = WriteBatch::new();
        for candidate in &candidates {
            batch.queue_merge(
                self.scope.player(&candidate.player_id),
                hunting_patch(&candidate.stats, now),
            );
            report.players_written += 1;
        }

        self.store.commit(batch)?;
        tracing::info!(
            "Hunting sheet committed: {} rows, {} skipped",
            report.rows_processed,
            report.rows_skipped
        );
        Ok(report)
    }

    fn check_duplicates(&self, duplicates: &[String]) -> Result<()> {
        if duplicates.is_empty() {
            return Ok(());
        }
        match self.config.duplicate_ids {
            DuplicatePolicy::Reject => Err(RosterError::DuplicateEntry(format!(
                "player IDs appear on more than one row: {}",
                duplicates.join(", ")
            ))),
            DuplicatePolicy::Sequential => {
                tracing::warn!(
                    "Player IDs repeated in upload, later rows win: {}",
                    duplicates.join(", ")
                );
                Ok(())
            }
        }
    }

    pub fn save_note(&self, player_id: &str, note: &str) -> Result<()> {
        self.save_note_at(player_id, note, Utc::now())
    }

    pub fn save_note_at(&self, player_id: &str, note: &str, now: DateTime<Utc>) -> Result<()> {
        let path = self.scope.player(player_id);
        if self.store.get(&path)?.is_none() {
            return Err(RosterError::NotFound(format!("player {}", player_id)));
        }

        let mut batch = WriteBatch::new();
        batch.queue_merge(path, note_patch(note, now));
        self.store.commit(batch)
    }

    /// History snapshots for a player, newest first.
    pub fn player_history(&self, player_id: &str) -> Result<Vec<Document>> {
        let mut entries: Vec<Document> = self
            .store
            .list(&self.scope.history(player_id))?
            .into_iter()
            .map(|(_, doc)| doc)
            .collect();
        entries.sort_by_key(|doc| {
            std::cmp::Reverse(doc.get(fields::SNAPSHOT_TIME).and_then(parse_timestamp))
        });
        Ok(entries)
    }

    /// Every stored player, numeric identifiers in numeric order.
    pub fn list_players(&self) -> Result<Vec<Document>> {
        let mut players = self.store.list(&self.scope.players())?;
        players.sort_by(|(a, _), (b, _)| compare_player_ids(a, b));
        Ok(players.into_iter().map(|(_, doc)| doc).collect())
    }
}
