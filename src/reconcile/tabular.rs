use super::error::ParseError;
use serde::Serialize;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// 1-based ordinal among non-blank data lines, structural rejects included.
    pub row: usize,
    /// 1-based physical line in the upload.
    pub line: usize,
    pub fields: Vec<String>,
}

impl RawRow {
    pub fn get(&self, col: usize) -> &str {
        self.fields.get(col).map(|s| s.as_str()).unwrap_or("")
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StructuralError {
    pub row: usize,
    pub line: usize,
    pub expected_fields: usize,
    pub found_fields: usize,
}

#[derive(Debug, Clone)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
    pub structural_errors: Vec<StructuralError>,
}

impl ParsedTable {
    /// Every non-blank data line, whether or not it survived parsing.
    pub fn total_rows(&self) -> usize {
        self.rows.len() + self.structural_errors.len()
    }
}

pub fn parse_table(bytes: &[u8], max_bytes: usize) -> Result<ParsedTable, ParseError> {
    if bytes.len() > max_bytes {
        return Err(ParseError::TooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let text = std::str::from_utf8(bytes).map_err(|e| ParseError::Encoding {
        offset: e.valid_up_to(),
    })?;

    let mut lines = text
        .split('\n')
        .enumerate()
        .map(|(i, l)| (i + 1, l.strip_suffix('\r').unwrap_or(l)))
        .filter(|(_, l)| !l.trim().is_empty());

    let Some((_, header_line)) = lines.next() else {
        return Err(ParseError::Empty);
    };
    let headers = parse_csv_record(header_line)
        .into_iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    let mut structural_errors = Vec::new();
    for (ordinal, (line, raw)) in lines.enumerate() {
        let fields = parse_csv_record(raw)
            .into_iter()
            .map(|f| f.trim().to_string())
            .collect::<Vec<_>>();
        if fields.len() != headers.len() {
            structural_errors.push(StructuralError {
                row: ordinal + 1,
                line,
                expected_fields: headers.len(),
                found_fields: fields.len(),
            });
            continue;
        }
        rows.push(RawRow {
            row: ordinal + 1,
            line,
            fields,
        });
    }

    if rows.is_empty() && structural_errors.is_empty() {
        return Err(ParseError::NoDataRows);
    }

    Ok(ParsedTable {
        headers,
        rows,
        structural_errors,
    })
}

/// Splits one delimited record; double quotes group commas and `""` escapes a quote.
pub fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '"' {
            if in_quotes && chars.peek() == Some(&'"') {
                buf.push('"');
                chars.next();
                continue;
            }
            in_quotes = !in_quotes;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(std::mem::take(&mut buf));
            continue;
        }
        buf.push(ch);
    }
    out.push(buf);
    out
}
