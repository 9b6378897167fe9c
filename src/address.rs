use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

lazy_static! {
    static ref A1_REGEX: Regex =
        Regex::new(r"^([A-Za-z]*)([0-9]*)(?::([A-Za-z]*)([0-9]*))?$").unwrap();
}

/// Convert a 1-based column number to spreadsheet letters
///
/// Bijective base-26: 1 → `A`, 26 → `Z`, 27 → `AA`, 702 → `ZZ`, 703 → `AAA`.
/// Column 0 has no letter form and yields an empty string.
///
/// # Examples
/// ```
/// use shopfloor_bridge::address::column_to_letter;
///
/// assert_eq!(column_to_letter(1), "A");
/// assert_eq!(column_to_letter(27), "AA");
/// ```
pub fn column_to_letter(col: u32) -> String {
    let mut col = col;
    let mut result = String::new();
    while col > 0 {
        col -= 1;
        result.push(((col % 26) as u8 + b'A') as char);
        col /= 26;
    }
    result.chars().rev().collect()
}

/// Convert spreadsheet letters back to a 1-based column number
///
/// Accepts either case. Returns `None` for an empty string, any non-letter
/// character, or a value that would overflow.
pub fn letter_to_column(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    letters.chars().try_fold(0u32, |acc, c| {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = (c.to_ascii_uppercase() as u8 - b'A' + 1) as u32;
        acc.checked_mul(26)?.checked_add(digit)
    })
}

/// Quote a sheet title for use in A1 notation
///
/// Plain ASCII identifiers are left alone; anything else (spaces, Cyrillic,
/// punctuation) is wrapped in single quotes with embedded quotes doubled.
pub fn quote_sheet_name(name: &str) -> String {
    let plain = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

/// Build a sheet-qualified range such as `'Табель Март 2024'!C3:AG3`
pub fn sheet_range(sheet: &str, a1: &str) -> String {
    format!("{}!{}", quote_sheet_name(sheet), a1)
}

/// Address of a single cell inside a named sheet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellAddress {
    pub sheet: String,
    /// 1-based column number
    pub column: u32,
    /// 1-based row number
    pub row: u32,
}

impl CellAddress {
    pub fn new(sheet: impl Into<String>, column: u32, row: u32) -> Self {
        CellAddress {
            sheet: sheet.into(),
            column,
            row,
        }
    }

    pub fn column_letter(&self) -> String {
        column_to_letter(self.column)
    }

    /// Unqualified A1 form, e.g. `E5`
    pub fn a1(&self) -> String {
        format!("{}{}", self.column_letter(), self.row)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&sheet_range(&self.sheet, &self.a1()))
    }
}

/// A parsed A1 range reference
///
/// Missing bounds are open: `A:A` has no row bounds, `A1:G` has no end row.
/// Columns and rows are 1-based.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct A1Range {
    pub sheet: Option<String>,
    pub start_col: Option<u32>,
    pub start_row: Option<u32>,
    pub end_col: Option<u32>,
    pub end_row: Option<u32>,
}

impl A1Range {
    /// Parse a range reference like `'Выпуск'!A1:G`, `Sheet1!E5` or `B4:B12`
    pub fn parse(reference: &str) -> Result<Self, String> {
        let (sheet, cells) = split_sheet(reference)?;

        let caps = A1_REGEX
            .captures(cells)
            .ok_or_else(|| format!("invalid range '{}'", reference))?;

        let col = |i: usize| caps.get(i).and_then(|m| letter_to_column(m.as_str()));
        let row = |i: usize| {
            caps.get(i)
                .filter(|m| !m.as_str().is_empty())
                .and_then(|m| m.as_str().parse::<u32>().ok())
        };

        let start_col = col(1);
        let start_row = row(2);
        if start_col.is_none() && start_row.is_none() {
            return Err(format!("invalid range '{}'", reference));
        }
        if start_row == Some(0) {
            return Err(format!("invalid range '{}'", reference));
        }

        let (end_col, end_row) = if caps.get(3).is_some() || caps.get(4).is_some() {
            (col(3), row(4))
        } else {
            // A single cell is its own end
            (start_col, start_row)
        };

        Ok(A1Range {
            sheet,
            start_col,
            start_row,
            end_col,
            end_row,
        })
    }
}

fn split_sheet(reference: &str) -> Result<(Option<String>, &str), String> {
    if let Some(rest) = reference.strip_prefix('\'') {
        // Quoted title: find the closing quote that is not a doubled ''
        let mut chars = rest.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    chars.next();
                    continue;
                }
                let title = rest[..i].replace("''", "'");
                let after = &rest[i + 1..];
                let cells = after
                    .strip_prefix('!')
                    .ok_or_else(|| format!("invalid range '{}'", reference))?;
                return Ok((Some(title), cells));
            }
        }
        return Err(format!("unterminated sheet name in '{}'", reference));
    }

    match reference.rsplit_once('!') {
        Some((sheet, cells)) => Ok((Some(sheet.to_string()), cells)),
        None => Ok((None, reference)),
    }
}
