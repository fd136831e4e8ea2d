//! JSON and XLSX export of the stored player list.

use crate::error::{Result, RosterError};
use crate::models::{fields, parse_timestamp, Document};
use chrono::{DateTime, TimeZone, Utc};
use rust_xlsxwriter::{Format, FormatBorder, Workbook, Worksheet};
use serde_json::Value;
use std::fmt;
use std::path::Path;

pub const SHEET_NAME: &str = "Lords Mobile Players";
pub const HUNTING_PREFIX: &str = "Hunting: ";

/// Columns that lead the spreadsheet, in this order, when present.
pub const PREFERRED_COLUMNS: [&str; 12] = [
    fields::ID,
    fields::NAME,
    fields::MIGHT,
    fields::KILLS,
    fields::MIGHT_GAINED,
    fields::KILLS_GAINED,
    fields::RANK,
    fields::TIER,
    fields::SIGILS,
    fields::MANA,
    fields::DISCORD,
    fields::NOTES,
];

const HUNTING_TIMESTAMPS: [&str; 3] = [
    fields::FIRST_HUNT_TIME,
    fields::LAST_HUNT_TIME,
    fields::HUNTING_LAST_UPDATED,
];

/// Render a stored timestamp as `M/D/YYYY, h:mm:ss AM` in `tz`.
pub fn format_timestamp<Tz: TimeZone>(ts: DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: fmt::Display,
{
    ts.with_timezone(tz)
        .format("%-m/%-d/%Y, %-I:%M:%S %p")
        .to_string()
}

/// Replace a stored timestamp string with its display form; other values pass through.
fn localize<Tz: TimeZone>(value: &Value, tz: &Tz) -> Value
where
    Tz::Offset: fmt::Display,
{
    match parse_timestamp(value) {
        Some(ts) => Value::String(format_timestamp(ts, tz)),
        None => value.clone(),
    }
}

/// Player documents with their timestamps localized, as pretty-printed JSON.
pub fn players_to_json<Tz: TimeZone>(players: &[Document], tz: &Tz) -> Result<String>
where
    Tz::Offset: fmt::Display,
{
    if players.is_empty() {
        return Err(RosterError::NothingToExport("JSON"));
    }

    let localized: Vec<Document> = players
        .iter()
        .map(|player| {
            let mut player = player.clone();
            if let Some(value) = player.get_mut(fields::LAST_UPDATED) {
                *value = localize(value, tz);
            }
            if let Some(Value::Object(hunting)) = player.get_mut(fields::HUNTING_STATS) {
                for key in HUNTING_TIMESTAMPS {
                    if let Some(value) = hunting.get_mut(key) {
                        *value = localize(value, tz);
                    }
                }
            }
            player
        })
        .collect();

    Ok(serde_json::to_string_pretty(&localized)?)
}

/// One spreadsheet row: `huntingStats` lifted into `Hunting: <field>` columns.
pub fn flatten_player<Tz: TimeZone>(player: &Document, tz: &Tz) -> Document
where
    Tz::Offset: fmt::Display,
{
    let mut row = Document::new();
    for (key, value) in player {
        if key == fields::HUNTING_STATS {
            continue;
        }
        row.insert(key.clone(), value.clone());
    }

    let last_updated = player
        .get(fields::LAST_UPDATED)
        .and_then(parse_timestamp)
        .map(|ts| format_timestamp(ts, tz))
        .unwrap_or_default();
    row.insert(fields::LAST_UPDATED.to_string(), Value::String(last_updated));

    if let Some(Value::Object(hunting)) = player.get(fields::HUNTING_STATS) {
        for (key, value) in hunting {
            let value = if HUNTING_TIMESTAMPS.contains(&key.as_str()) {
                localize(value, tz)
            } else {
                value.clone()
            };
            row.insert(format!("{}{}", HUNTING_PREFIX, key), value);
        }
    }
    row
}

/// Union of row keys: preferred columns first, the rest in first-seen order.
pub fn export_columns(rows: &[Document]) -> Vec<String> {
    let mut columns: Vec<String> = PREFERRED_COLUMNS
        .iter()
        .filter(|col| rows.iter().any(|row| row.contains_key(**col)))
        .map(|col| col.to_string())
        .collect();

    for row in rows {
        for key in row.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn write_cell(sheet: &mut Worksheet, row: u32, col: u16, value: &Value) -> Result<()> {
    match value {
        Value::Null => {}
        Value::Bool(b) => {
            sheet.write_boolean(row, col, *b)?;
        }
        Value::Number(n) => {
            if let Some(n) = n.as_f64() {
                sheet.write_number(row, col, n)?;
            }
        }
        Value::String(s) => {
            sheet.write_string(row, col, s)?;
        }
        other => {
            sheet.write_string(row, col, other.to_string())?;
        }
    }
    Ok(())
}

fn write_players_sheet(sheet: &mut Worksheet, rows: &[Document], columns: &[String]) -> Result<()> {
    let header_format = Format::new().set_bold().set_border_bottom(FormatBorder::Thin);

    for (col, header) in columns.iter().enumerate() {
        let col = col as u16;
        sheet.write_string_with_format(0, col, header, &header_format)?;
        sheet.set_column_width(col, (header.len() as f64 + 2.0).max(10.0))?;
    }

    for (row_idx, row) in rows.iter().enumerate() {
        let row_num = (row_idx + 1) as u32;
        for (col, key) in columns.iter().enumerate() {
            if let Some(value) = row.get(key) {
                write_cell(sheet, row_num, col as u16, value)?;
            }
        }
    }

    sheet.set_name(SHEET_NAME)?;
    Ok(())
}

/// Build the workbook for `players` and return its bytes.
pub fn players_to_xlsx<Tz: TimeZone>(players: &[Document], tz: &Tz) -> Result<Vec<u8>>
where
    Tz::Offset: fmt::Display,
{
    if players.is_empty() {
        return Err(RosterError::NothingToExport("XLSX"));
    }

    let rows: Vec<Document> = players.iter().map(|p| flatten_player(p, tz)).collect();
    let columns = export_columns(&rows);

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    write_players_sheet(worksheet, &rows, &columns)?;
    Ok(workbook.save_to_buffer()?)
}

pub fn write_players_xlsx<Tz: TimeZone>(players: &[Document], tz: &Tz, path: &Path) -> Result<()>
where
    Tz::Offset: fmt::Display,
{
    let bytes = players_to_xlsx(players, tz)?;
    std::fs::write(path, bytes)?;
    Ok(())
}
