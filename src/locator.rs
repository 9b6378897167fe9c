use crate::address::{CellAddress, column_to_letter, sheet_range};
use crate::cell::{first_column, first_row, parse_date};
use crate::error::{BridgeError, Result};
use crate::sheets::{GridRange, SheetStore};
use chrono::{Datelike, NaiveDate};
use log::debug;
use serde::Deserialize;

/// What the header cells of a month-sheet's date band hold
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HeaderConvention {
    /// Plain day numbers `1`..`31`
    #[default]
    DayOfMonth,
    /// Full dates, `YYYY-MM-DD` or `DD.MM.YYYY`
    IsoDate,
}

/// Where things live on a month-sheet
///
/// Rows and columns are 1-based. The defaults describe the shop's timesheet
/// template: employee names in `B4:B12`, day numbers in `C3:AG3`, hours in
/// `C4:AG17`, and a title line across row 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimesheetLayout {
    pub name_column: u32,
    pub first_name_row: u32,
    pub last_name_row: u32,
    pub header_row: u32,
    pub first_day_column: u32,
    pub last_day_column: u32,
    /// Last row of the hours region cleared on a fresh month-sheet
    pub last_data_row: u32,
    /// Number of columns the title line spans
    pub title_columns: u32,
    pub header: HeaderConvention,
}

impl Default for TimesheetLayout {
    fn default() -> Self {
        TimesheetLayout {
            name_column: 2,
            first_name_row: 4,
            last_name_row: 12,
            header_row: 3,
            first_day_column: 3,
            last_day_column: 33,
            last_data_row: 17,
            title_columns: 26,
            header: HeaderConvention::DayOfMonth,
        }
    }
}

impl TimesheetLayout {
    /// The name band, e.g. `'Табель Март 2024'!B4:B12`
    pub fn names_range(&self, sheet: &str) -> String {
        let col = column_to_letter(self.name_column);
        let a1 = format!("{col}{}:{col}{}", self.first_name_row, self.last_name_row);
        sheet_range(sheet, &a1)
    }

    /// The date band, e.g. `'Табель Март 2024'!C3:AG3`
    pub fn days_range(&self, sheet: &str) -> String {
        sheet_range(
            sheet,
            &format!(
                "{}{}:{}{}",
                column_to_letter(self.first_day_column),
                self.header_row,
                column_to_letter(self.last_day_column),
                self.header_row
            ),
        )
    }

    /// Hours region as a zero-based grid range
    pub fn data_region(&self, sheet_id: i64) -> GridRange {
        GridRange::new(
            sheet_id,
            (self.first_name_row - 1, Some(self.last_data_row)),
            (self.first_day_column - 1, Some(self.last_day_column)),
        )
    }

    /// Title line as a zero-based grid range
    pub fn title_region(&self, sheet_id: i64) -> GridRange {
        GridRange::new(sheet_id, (0, Some(1)), (0, Some(self.title_columns)))
    }
}

/// Find the row holding `name` in the name band
///
/// `names` are the band's cells from the first name row down. Comparison is
/// exact after trimming both sides; the first match wins.
pub fn find_row(layout: &TimesheetLayout, names: &[String], name: &str) -> Result<u32> {
    let wanted = name.trim();
    names
        .iter()
        .position(|n| n.trim() == wanted)
        .map(|offset| layout.first_name_row + offset as u32)
        .ok_or_else(|| BridgeError::NotFound {
            what: "full name",
            value: wanted.to_string(),
            available: names
                .iter()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
        })
}

/// Find the column whose header matches `date` in the date band
///
/// `headers` are the band's cells from the first day column rightwards.
pub fn find_column(layout: &TimesheetLayout, headers: &[String], date: NaiveDate) -> Result<u32> {
    let matches = |header: &String| match layout.header {
        HeaderConvention::DayOfMonth => header.trim().parse::<u32>().ok() == Some(date.day()),
        HeaderConvention::IsoDate => parse_date(header) == Some(date),
    };

    headers
        .iter()
        .position(matches)
        .map(|offset| layout.first_day_column + offset as u32)
        .ok_or_else(|| BridgeError::NotFound {
            what: "day",
            value: match layout.header {
                HeaderConvention::DayOfMonth => date.day().to_string(),
                HeaderConvention::IsoDate => date.format("%Y-%m-%d").to_string(),
            },
            available: headers.to_vec(),
        })
}

/// Resolve the hours cell for `name` on `date` inside `sheet`
///
/// Reads the name band and the date band, then scans each linearly.
///
/// # Returns
/// * `Result<CellAddress>` - The cell address, a `NotFound` error listing the
///   names or headers actually present, or a `Store` error if a read failed
pub async fn locate<S: SheetStore>(
    store: &S,
    layout: &TimesheetLayout,
    sheet: &str,
    name: &str,
    date: NaiveDate,
) -> Result<CellAddress> {
    let names = store
        .get_range(&layout.names_range(sheet))
        .await
        .map_err(|e| BridgeError::store("failed to get names", e))?;
    let row = find_row(layout, &first_column(&names), name)?;

    let days = store
        .get_range(&layout.days_range(sheet))
        .await
        .map_err(|e| BridgeError::store("failed to get days", e))?;
    let column = find_column(layout, &first_row(&days), date)?;

    let address = CellAddress::new(sheet, column, row);
    debug!("Located {} on {} at {}", name.trim(), date, address);
    Ok(address)
}
