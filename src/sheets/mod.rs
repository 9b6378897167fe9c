//! Spreadsheet client adapter
//!
//! [`SheetStore`] is the only way the rest of the crate touches the remote
//! spreadsheet. [`google::GoogleSheets`] talks to the Sheets v4 REST API;
//! [`memory::InMemorySheets`] keeps everything in process.

pub mod auth;
pub mod google;
pub mod memory;
pub mod retry;

use crate::cell::{CellValue, Grid};
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::future::Future;

pub use google::GoogleSheets;
pub use memory::InMemorySheets;

/// How written strings are interpreted by the store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueInput {
    /// Stored verbatim
    Raw,
    /// Parsed as if typed into the UI (numbers, dates, formulas)
    UserEntered,
}

impl ValueInput {
    pub fn as_api_str(self) -> &'static str {
        match self {
            ValueInput::Raw => "RAW",
            ValueInput::UserEntered => "USER_ENTERED",
        }
    }
}

/// Properties of one sheet (tab) in the spreadsheet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetProperties {
    pub sheet_id: i64,
    pub title: String,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub hidden: bool,
}

/// Zero-based, end-exclusive rectangle inside one sheet
///
/// `None` for an end bound means "to the edge of the sheet".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GridRange {
    pub sheet_id: i64,
    pub start_row: u32,
    pub end_row: Option<u32>,
    pub start_col: u32,
    pub end_col: Option<u32>,
}

impl GridRange {
    pub fn new(sheet_id: i64, rows: (u32, Option<u32>), cols: (u32, Option<u32>)) -> Self {
        GridRange {
            sheet_id,
            start_row: rows.0,
            end_row: rows.1,
            start_col: cols.0,
            end_col: cols.1,
        }
    }

    pub fn contains(&self, row: u32, col: u32) -> bool {
        row >= self.start_row
            && self.end_row.is_none_or(|end| row < end)
            && col >= self.start_col
            && self.end_col.is_none_or(|end| col < end)
    }
}

/// Cell format applied by [`StructuralRequest::Format`]
#[derive(Clone, Debug, PartialEq)]
pub struct CellFormat {
    pub horizontal_alignment: String,
    pub font_family: String,
    pub font_size: u32,
}

/// One structural edit inside a batch update
#[derive(Clone, Debug, PartialEq)]
pub enum StructuralRequest {
    /// Change any subset of a sheet's title, visibility and position
    UpdateProperties {
        sheet_id: i64,
        title: Option<String>,
        hidden: Option<bool>,
        index: Option<u32>,
    },
    /// Write the same string into every cell of the range
    SetValue { range: GridRange, value: String },
    /// Remove the values (not the formatting) of every cell in the range
    ClearValues { range: GridRange },
    /// Apply alignment and font to every cell in the range
    Format {
        range: GridRange,
        format: CellFormat,
    },
    /// Remove a sheet and its contents
    DeleteSheet { sheet_id: i64 },
}

impl StructuralRequest {
    pub fn rename(sheet_id: i64, title: impl Into<String>) -> Self {
        StructuralRequest::UpdateProperties {
            sheet_id,
            title: Some(title.into()),
            hidden: None,
            index: None,
        }
    }

    pub fn set_hidden(sheet_id: i64, hidden: bool) -> Self {
        StructuralRequest::UpdateProperties {
            sheet_id,
            title: None,
            hidden: Some(hidden),
            index: None,
        }
    }

    /// Unhide a sheet and move it to `index`
    pub fn reveal_at(sheet_id: i64, index: u32) -> Self {
        StructuralRequest::UpdateProperties {
            sheet_id,
            title: None,
            hidden: Some(false),
            index: Some(index),
        }
    }
}

/// Remote key-range store holding the spreadsheet
///
/// Ranges are A1 references qualified with a sheet title, as produced by
/// [`crate::address::sheet_range`]. Returned grids are trimmed the way the
/// Sheets API trims them: trailing empty rows and trailing empty cells in a
/// row are omitted.
pub trait SheetStore: Send + Sync {
    /// Read the values in `range`
    fn get_range(&self, range: &str) -> impl Future<Output = Result<Grid, StoreError>> + Send;

    /// Overwrite the cells starting at the top-left corner of `range`
    fn update_range(
        &self,
        range: &str,
        rows: Grid,
        input: ValueInput,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Append one row after the last non-empty row of the table at `range`
    ///
    /// Neither ledger strategy calls this: `AppendOnly` computes its target
    /// row itself and writes it with [`SheetStore::update_range`].
    fn append_row(
        &self,
        range: &str,
        row: Vec<CellValue>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Apply structural edits atomically, in order
    fn batch_update(
        &self,
        requests: Vec<StructuralRequest>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// List every sheet in the spreadsheet, in tab order
    fn list_sheets(&self) -> impl Future<Output = Result<Vec<SheetProperties>, StoreError>> + Send;

    /// Duplicate a sheet inside the same spreadsheet, returning the copy
    fn copy_sheet(
        &self,
        sheet_id: i64,
    ) -> impl Future<Output = Result<SheetProperties, StoreError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_range_bounds() {
        let range = GridRange::new(7, (3, Some(17)), (2, Some(33)));
        assert!(range.contains(3, 2));
        assert!(range.contains(16, 32));
        assert!(!range.contains(17, 2));
        assert!(!range.contains(3, 33));
        assert!(!range.contains(2, 5));

        let open = GridRange::new(7, (1, None), (0, Some(7)));
        assert!(open.contains(5000, 6));
        assert!(!open.contains(0, 0));
    }

    #[test]
    fn sheet_properties_from_api_json() {
        let props: SheetProperties = serde_json::from_str(
            r#"{"sheetId": 42, "title": "Табель", "index": 3, "hidden": true}"#,
        )
        .unwrap();
        assert_eq!(props.sheet_id, 42);
        assert!(props.hidden);

        // The API omits default-valued fields
        let json = r#"{"sheetId": 0, "title": "Выпуск"}"#;
        let props: SheetProperties = serde_json::from_str(json).unwrap();
        assert_eq!(props.index, 0);
        assert!(!props.hidden);
    }
}
