use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// A single cell value as returned by the spreadsheet store
///
/// The remote API hands back loosely typed JSON (strings, numbers, booleans).
/// Values are classified once at the boundary and every later comparison
/// works on [`CellValue::text`].
#[derive(Clone, Debug, PartialEq, Serialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
}

impl CellValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => CellValue::Empty,
            Value::String(s) if s.is_empty() => CellValue::Empty,
            Value::String(s) => CellValue::Text(s.clone()),
            Value::Number(n) => n.as_f64().map(CellValue::Number).unwrap_or_default(),
            Value::Bool(b) => CellValue::Text(b.to_string().to_uppercase()),
            other => CellValue::Text(other.to_string()),
        }
    }

    /// Normalised text of the cell
    ///
    /// Whole numbers are rendered without a fractional part so that a
    /// header holding `5` and one holding `"5"` compare equal.
    pub fn text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            CellValue::Number(n) => n.to_string(),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::Number(_) => false,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(s.to_string())
        }
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        if s.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(s)
        }
    }
}

impl<'de> Deserialize<'de> for CellValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(CellValue::from_json(&value))
    }
}

/// Rectangular block of cells, row-major
pub type Grid = Vec<Vec<CellValue>>;

/// Convert a row of strings into cells
pub fn row_of<S: AsRef<str>>(values: &[S]) -> Vec<CellValue> {
    values.iter().map(|v| CellValue::from(v.as_ref())).collect()
}

/// Normalised text of every cell in the first column of `grid`
///
/// Rows shorter than one cell yield an empty string so the position of each
/// entry still matches its row offset.
pub fn first_column(grid: &Grid) -> Vec<String> {
    grid.iter()
        .map(|row| row.first().map(CellValue::text).unwrap_or_default())
        .collect()
}

/// Normalised text of every cell in the first row of `grid`
pub fn first_row(grid: &Grid) -> Vec<String> {
    grid.first()
        .map(|row| row.iter().map(CellValue::text).collect())
        .unwrap_or_default()
}

/// Parse a date as it appears in a sheet
///
/// Accepts ISO `YYYY-MM-DD` (what the form sends) and `DD.MM.YYYY` (how a
/// Russian-locale spreadsheet renders a date cell).
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%d.%m.%Y"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_and_strings_normalise_alike() {
        assert_eq!(CellValue::from_json(&json!(5)).text(), "5");
        assert_eq!(CellValue::from_json(&json!(5.0)).text(), "5");
        assert_eq!(CellValue::from_json(&json!("5")).text(), "5");
        assert_eq!(CellValue::from_json(&json!(7.5)).text(), "7.5");
    }

    #[test]
    fn blank_detection() {
        assert!(CellValue::from_json(&json!(null)).is_blank());
        assert!(CellValue::from_json(&json!("")).is_blank());
        assert!(CellValue::from("   ").is_blank());
        assert!(!CellValue::Number(0.0).is_blank());
    }

    #[test]
    fn dates_in_both_notations() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15);
        assert_eq!(parse_date("2024-01-15"), expected);
        assert_eq!(parse_date(" 15.01.2024 "), expected);
        assert_eq!(parse_date("15/01/2024"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn deserializes_value_matrix() {
        let raw = json!([["Дата", 1, true], [], ["x"]]);
        let grid: Grid = serde_json::from_value(raw).unwrap();
        assert_eq!(grid[0][0], CellValue::Text("Дата".into()));
        assert_eq!(grid[0][1], CellValue::Number(1.0));
        assert_eq!(grid[0][2].text(), "TRUE");
        assert!(grid[1].is_empty());
        assert_eq!(first_column(&grid), vec!["Дата", "", "x"]);
        assert_eq!(first_row(&grid), vec!["Дата", "1", "TRUE"]);
    }
}
