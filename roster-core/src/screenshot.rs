//! Screenshot tracking: a vision model reads name, might and kills off a game
//! screenshot, and the result is tracked against the first reading for that name.

use crate::config::VisionConfig;
use crate::error::{Result, RosterError};
use crate::extraction::value_as_number;
use crate::models::{fields, number_value, timestamp_value, Document, ScreenshotStats};
use crate::store::{DocumentStore, WriteBatch};
use crate::upload::Uploader;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

pub const PROMPT: &str = "From the provided Lords Mobile game screenshot, extract the player's name, \
total might, and kills. Return the data as a JSON object with keys: \"name\" (string), \
\"might\" (number), and \"kills\" (number). Do not include commas in the numbers.";

const INVALID_REPLY: &str = "Failed to get a valid response from the AI model.";
const MISSING_FIELDS: &str = "Could not extract all required fields from the image.";

pub mod keys {
    pub const PLAYER_NAME: &str = "playerName";
    pub const INITIAL_MIGHT: &str = "initialMight";
    pub const INITIAL_KILLS: &str = "initialKills";
    pub const CURRENT_MIGHT: &str = "currentMight";
    pub const CURRENT_KILLS: &str = "currentKills";
    pub const MIGHT_GAIN: &str = "mightGain";
    pub const KILLS_GAIN: &str = "killsGain";
    pub const CREATED_AT: &str = "createdAt";
}

/// Document key for a screenshot player: lowercased name, ASCII letters and digits only.
pub fn screenshot_player_id(name: &str) -> Option<String> {
    let key: String = name
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect();
    (!key.is_empty()).then_some(key)
}

/// MIME type of an uploaded screenshot, sniffed from its leading bytes.
pub fn image_mime_type(image: &[u8]) -> Result<&'static str> {
    image::guess_format(image)
        .map(|format| format.to_mime_type())
        .map_err(|e| RosterError::Extraction(format!("Unrecognized image: {}", e)))
}

/// `generateContent` request carrying the prompt, the image and the response schema.
pub fn build_request_body(image: &[u8]) -> Result<Value> {
    let mime_type = image_mime_type(image)?;
    Ok(json!({
        "contents": [{
            "parts": [
                { "text": PROMPT },
                { "inlineData": { "mimeType": mime_type, "data": STANDARD.encode(image) } }
            ]
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "OBJECT",
                "properties": {
                    "name": { "type": "STRING" },
                    "might": { "type": "NUMBER" },
                    "kills": { "type": "NUMBER" }
                },
                "required": ["name", "might", "kills"]
            }
        }
    }))
}

/// Pull the stats out of a `generateContent` response body.
pub fn parse_reply(body: &Value) -> Result<ScreenshotStats> {
    let text = body
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .ok_or_else(|| RosterError::Extraction(INVALID_REPLY.to_string()))?;

    let extracted: Value = serde_json::from_str(text)
        .map_err(|e| RosterError::Extraction(format!("{} ({})", INVALID_REPLY, e)))?;

    let name = extracted
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty());
    let might = extracted.get("might").filter(|v| !v.is_null());
    let kills = extracted.get("kills").filter(|v| !v.is_null());

    match (name, might, kills) {
        (Some(name), Some(might), Some(kills)) => Ok(ScreenshotStats {
            name: name.to_string(),
            might: value_as_number(Some(might)),
            kills: value_as_number(Some(kills)),
        }),
        _ => Err(RosterError::Extraction(MISSING_FIELDS.to_string())),
    }
}

/// Client for the generative-language `generateContent` endpoint.
pub struct VisionClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl VisionClient {
    pub fn new(endpoint: &str, model: &str, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        }
    }

    /// Build a client, reading the API key from the configured environment variable.
    pub fn from_config(config: &VisionConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            RosterError::Config(format!("{} is not set", config.api_key_env))
        })?;
        Ok(Self::new(&config.endpoint, &config.model, api_key))
    }

    pub fn url(&self) -> String {
        format!("{}/{}:generateContent", self.endpoint, self.model)
    }

    pub async fn extract(&self, image: &[u8]) -> Result<ScreenshotStats> {
        let body = build_request_body(image)?;
        tracing::debug!("Sending {} byte screenshot to {}", image.len(), self.model);

        let response = self
            .http
            .post(self.url())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RosterError::Extraction(format!(
                "AI analysis failed with status: {}.",
                status.as_u16()
            )));
        }

        let reply: Value = response.json().await?;
        parse_reply(&reply)
    }
}

/// Write for one screenshot reading: a fresh record on first sight, else
/// current values and gains against the first reading.
pub fn screenshot_update(
    stats: &ScreenshotStats,
    prior: Option<&Document>,
    now: DateTime<Utc>,
) -> Document {
    let mut doc = Document::new();
    match prior {
        Some(prior) => {
            let initial_might = value_as_number(prior.get(keys::INITIAL_MIGHT));
            let initial_kills = value_as_number(prior.get(keys::INITIAL_KILLS));
            doc.insert(keys::CURRENT_MIGHT.into(), number_value(stats.might));
            doc.insert(keys::CURRENT_KILLS.into(), number_value(stats.kills));
            doc.insert(keys::MIGHT_GAIN.into(), number_value(stats.might - initial_might));
            doc.insert(keys::KILLS_GAIN.into(), number_value(stats.kills - initial_kills));
        }
        None => {
            doc.insert(keys::PLAYER_NAME.into(), Value::String(stats.name.trim().to_string()));
            doc.insert(keys::INITIAL_MIGHT.into(), number_value(stats.might));
            doc.insert(keys::INITIAL_KILLS.into(), number_value(stats.kills));
            doc.insert(keys::CURRENT_MIGHT.into(), number_value(stats.might));
            doc.insert(keys::CURRENT_KILLS.into(), number_value(stats.kills));
            doc.insert(keys::MIGHT_GAIN.into(), number_value(0.0));
            doc.insert(keys::KILLS_GAIN.into(), number_value(0.0));
            doc.insert(keys::CREATED_AT.into(), timestamp_value(now));
        }
    }
    doc.insert(fields::LAST_UPDATED.into(), timestamp_value(now));
    doc
}

impl<S: DocumentStore> Uploader<S> {
    pub fn record_screenshot(&self, stats: &ScreenshotStats) -> Result<String> {
        self.record_screenshot_at(stats, Utc::now())
    }

    /// Store a screenshot reading; returns the player's key.
    pub fn record_screenshot_at(&self, stats: &ScreenshotStats, now: DateTime<Utc>) -> Result<String> {
        let key = screenshot_player_id(&stats.name).ok_or_else(|| {
            RosterError::Extraction("Player name from image is invalid.".to_string())
        })?;
        let path = self.scope().screenshot_player(&key);
        let prior = self.store().get(&path)?;

        let mut batch = WriteBatch::new();
        batch.queue_merge(path, screenshot_update(stats, prior.as_ref(), now));
        self.store().commit(batch)?;

        tracing::info!("Recorded screenshot stats for {} ({})", stats.name, key);
        Ok(key)
    }

    pub fn delete_screenshot_player(&self, key: &str) -> Result<()> {
        let path = self.scope().screenshot_player(key);
        if self.store().get(&path)?.is_none() {
            return Err(RosterError::NotFound(format!("screenshot player {}", key)));
        }
        let mut batch = WriteBatch::new();
        batch.queue_delete(path);
        self.store().commit(batch)
    }

    /// Screenshot players as `(key, document)`, ordered by key.
    pub fn list_screenshot_players(&self) -> Result<Vec<(String, Document)>> {
        self.store().list(&self.scope().screenshot_players())
    }
}
