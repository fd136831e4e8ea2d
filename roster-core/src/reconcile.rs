//! Reconciliation of a kill-sheet candidate against the stored player record.

use crate::extraction::value_as_number;
use crate::models::{fields, number_value, timestamp_value, Document, KillCandidate, Reconciliation};
use chrono::{DateTime, Utc};
use serde_json::Value;

const MIGHT_KEYS: [&str; 2] = [fields::MIGHT, "Might"];
const KILLS_KEYS: [&str; 2] = [fields::KILLS, "kills"];

fn first_present<'a>(doc: &'a Document, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| doc.get(*key))
}

/// Might and kills as recorded in a stored document.
pub fn stored_counters(doc: &Document) -> (f64, f64) {
    (
        value_as_number(first_present(doc, &MIGHT_KEYS)),
        value_as_number(first_present(doc, &KILLS_KEYS)),
    )
}

/// Compare `candidate` with the stored record and decide on a history write.
///
/// Without a prior record the gains equal the absolute values and nothing is
/// snapshotted. With one, a change in might, kills or name produces a history
/// payload holding the prior state as it was before this upload.
pub fn reconcile_kill(
    candidate: &KillCandidate,
    prior: Option<&Document>,
    now: DateTime<Utc>,
) -> Reconciliation {
    let Some(prior) = prior else {
        return Reconciliation {
            might_gained: candidate.might,
            kills_gained: candidate.kills,
            history: None,
        };
    };

    let (prior_might, prior_kills) = stored_counters(prior);
    let might_gained = candidate.might - prior_might;
    let kills_gained = candidate.kills - prior_kills;

    let prior_name = prior.get(fields::NAME).and_then(Value::as_str);
    let name_changed = prior_name != Some(candidate.name.as_deref().unwrap_or_default());

    let history = (might_gained != 0.0 || kills_gained != 0.0 || name_changed)
        .then(|| history_payload(prior, prior_might, prior_kills, now));

    Reconciliation {
        might_gained,
        kills_gained,
        history,
    }
}

fn history_payload(prior: &Document, might: f64, kills: f64, now: DateTime<Utc>) -> Document {
    let mut entry = prior.clone();
    entry.insert(fields::SNAPSHOT_TIME.to_string(), timestamp_value(now));
    entry.insert(fields::MIGHT.to_string(), number_value(might));
    entry.insert(fields::KILLS.to_string(), number_value(kills));
    for key in [fields::MIGHT_GAINED, fields::KILLS_GAINED] {
        let gained = value_as_number(prior.get(key));
        entry.insert(key.to_string(), number_value(gained));
    }
    entry
}
