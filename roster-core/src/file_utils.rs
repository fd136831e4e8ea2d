//! File utility functions.

use crate::error::{Result, RosterError};
use std::path::Path;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Decode spreadsheet bytes: UTF-8 (BOM stripped), falling back to Windows-1252.
pub fn decode_sheet_bytes(bytes: &[u8]) -> Result<String> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(text.to_string()),
        Err(_) => {
            tracing::debug!("Sheet is not valid UTF-8, decoding as Windows-1252");
            let (text, _, had_errors) = encoding_rs::WINDOWS_1252.decode(bytes);
            if had_errors {
                return Err(RosterError::Parse("Failed to decode Windows-1252 text".to_string()));
            }
            Ok(text.into_owned())
        }
    }
}

/// Read an uploaded sheet from disk.
pub fn read_sheet_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| {
        RosterError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read {}: {}", path.display(), e),
        ))
    })?;
    decode_sheet_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_strips_bom() {
        let text = decode_sheet_bytes(b"\xEF\xBB\xBFID,Name\n1,a\n").unwrap();
        assert!(text.starts_with("ID,Name"));
    }

    #[test]
    fn test_windows_1252_fallback() {
        // "Zoë" with 0xEB, invalid as UTF-8
        let text = decode_sheet_bytes(b"ID,Name\n1,Zo\xEB\n").unwrap();
        assert!(text.contains("Zoë"));
    }

    #[test]
    fn test_read_sheet_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"ID,Name\n42,Ada\n").unwrap();
        let text = read_sheet_file(file.path()).unwrap();
        assert_eq!(text, "ID,Name\n42,Ada\n");
    }

    #[test]
    fn test_read_missing_file() {
        let result = read_sheet_file(Path::new("/nonexistent/roster.csv"));
        assert!(matches!(result, Err(RosterError::Io(_))));
    }
}
