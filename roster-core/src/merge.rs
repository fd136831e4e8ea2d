//! Building the documents written back to the store.

use crate::models::{
    fields, number_value, timestamp_value, Document, HuntingStats, KillCandidate, Reconciliation,
};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Keys recomputed by every kill upload and therefore never copied forward from the prior record.
const RECOMPUTED_KEYS: [&str; 3] = [fields::HUNTING_STATS, fields::MIGHT_GAINED, fields::KILLS_GAINED];

/// Merge-write semantics: patch keys overwrite, nested objects merge
/// recursively, keys missing from the patch are left alone.
pub fn merge_into(target: &mut Document, patch: &Document) {
    for (key, value) in patch {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_into(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Final player document for a kill-sheet row.
pub fn merge_kill_document(
    candidate: &KillCandidate,
    prior: Option<&Document>,
    reconciliation: &Reconciliation,
    now: DateTime<Utc>,
) -> Document {
    let mut doc = Document::new();

    for (header, value) in &candidate.passthrough {
        doc.insert(header.clone(), Value::String(value.clone()));
    }

    let optional_text = [
        (fields::RANK, &candidate.rank),
        (fields::TIER, &candidate.tier),
        (fields::MANA, &candidate.mana),
        (fields::DISCORD, &candidate.discord),
    ];
    for (key, value) in optional_text {
        if let Some(value) = value {
            doc.insert(key.to_string(), Value::String(value.clone()));
        }
    }
    if let Some(sigils) = candidate.sigils {
        doc.insert(fields::SIGILS.to_string(), number_value(sigils));
    }

    doc.insert(fields::ID.to_string(), Value::String(candidate.player_id.clone()));
    if let Some(name) = &candidate.name {
        doc.insert(fields::NAME.to_string(), Value::String(name.clone()));
    }
    doc.insert(fields::MIGHT.to_string(), number_value(candidate.might));
    doc.insert(fields::KILLS.to_string(), number_value(candidate.kills));
    doc.insert(
        fields::MIGHT_GAINED.to_string(),
        number_value(reconciliation.might_gained),
    );
    doc.insert(
        fields::KILLS_GAINED.to_string(),
        number_value(reconciliation.kills_gained),
    );
    doc.insert(fields::LAST_UPDATED.to_string(), timestamp_value(now));

    let notes = non_empty_str(prior.and_then(|p| p.get(fields::NOTES)))
        .or(candidate.notes.as_deref().filter(|n| !n.is_empty()))
        .unwrap_or_default();
    doc.insert(fields::NOTES.to_string(), Value::String(notes.to_string()));

    if let Some(prior) = prior {
        for (key, value) in prior {
            if !doc.contains_key(key) && !RECOMPUTED_KEYS.contains(&key.as_str()) {
                doc.insert(key.clone(), value.clone());
            }
        }
    }
    if !doc.contains_key(fields::NAME) {
        doc.insert(fields::NAME.to_string(), Value::String(String::new()));
    }

    let hunting = prior
        .and_then(|p| p.get(fields::HUNTING_STATS))
        .cloned()
        .unwrap_or_else(|| Value::Object(Document::new()));
    doc.insert(fields::HUNTING_STATS.to_string(), hunting);

    doc
}

/// Patch replacing a player's hunting statistics and nothing else.
pub fn hunting_patch(stats: &HuntingStats, now: DateTime<Utc>) -> Document {
    let mut patch = Document::new();
    patch.insert(
        fields::HUNTING_STATS.to_string(),
        Value::Object(stats.to_document(now)),
    );
    patch
}

pub fn note_patch(note: &str, now: DateTime<Utc>) -> Document {
    let mut patch = Document::new();
    patch.insert(fields::NOTES.to_string(), Value::String(note.to_string()));
    patch.insert(fields::LAST_UPDATED.to_string(), timestamp_value(now));
    patch
}
