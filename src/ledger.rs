use crate::address::{column_to_letter, sheet_range};
use crate::cell::{CellValue, Grid, parse_date, row_of};
use crate::error::{BridgeError, Result};
use crate::month_sheet::SheetCache;
use crate::sheets::{CellFormat, GridRange, SheetStore, StructuralRequest, ValueInput};
use chrono::NaiveDate;
use log::info;
use serde::Deserialize;
use std::future::Future;
use tokio::sync::Mutex;

/// Number of columns in a ledger row (A..G)
pub const LEDGER_COLUMNS: usize = 7;

/// One production run as entered on the form
#[derive(Clone, Debug, PartialEq)]
pub struct ProductionRecord {
    pub date: NaiveDate,
    pub employee_name: String,
    pub part_operation: String,
    pub total_parts: u32,
    pub defective: Option<u32>,
    pub notes: String,
}

impl ProductionRecord {
    /// Build a validated record
    ///
    /// Name and part/operation are trimmed and must be non-empty; defective
    /// parts may not exceed the total.
    pub fn new(
        date: NaiveDate,
        employee_name: &str,
        part_operation: &str,
        total_parts: u32,
        defective: Option<u32>,
        notes: &str,
    ) -> Result<Self> {
        let employee_name = employee_name.trim();
        let part_operation = part_operation.trim();
        if employee_name.is_empty() {
            return Err(BridgeError::Validation("Full name is required".to_string()));
        }
        if part_operation.is_empty() {
            return Err(BridgeError::Validation(
                "Part and operation are required".to_string(),
            ));
        }
        if defective.is_some_and(|d| d > total_parts) {
            return Err(BridgeError::Validation(
                "Defective parts cannot exceed total parts".to_string(),
            ));
        }

        Ok(ProductionRecord {
            date,
            employee_name: employee_name.to_string(),
            part_operation: part_operation.to_string(),
            total_parts,
            defective,
            notes: notes.trim().to_string(),
        })
    }

    pub fn good_parts(&self) -> u32 {
        self.total_parts - self.defective.unwrap_or(0).min(self.total_parts)
    }

    /// The stored row: date, name, part/operation, total, defective, good, notes
    pub fn to_row(&self) -> Vec<CellValue> {
        row_of(&[
            self.date.format("%Y-%m-%d").to_string(),
            self.employee_name.clone(),
            self.part_operation.clone(),
            self.total_parts.to_string(),
            self.defective.map(|d| d.to_string()).unwrap_or_default(),
            self.good_parts().to_string(),
            self.notes.clone(),
        ])
    }
}

/// Parse a part count sent by the form
///
/// # Arguments
/// * `field` - Field name used in the error message
/// * `raw` - The value as text
///
/// # Returns
/// * `Result<u32>` - The count, or a `Validation` error for anything that is
///   not a non-negative integer
pub fn parse_count(field: &str, raw: &str) -> Result<u32> {
    raw.trim().parse::<u32>().map_err(|_| {
        BridgeError::Validation(format!("{} must be a non-negative integer", field))
    })
}

/// How records are written into the ledger sheet
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LedgerStrategy {
    /// Rewrite the whole sheet sorted by date with blank rows between days
    #[default]
    FullReflow,
    /// Write after the last filled row
    AppendOnly,
}

/// A strategy for adding a record to the ledger sheet
pub trait RecordWriter: Send + Sync {
    fn write<S: SheetStore>(
        &self,
        store: &S,
        cache: &SheetCache,
        record: &ProductionRecord,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Writes each record on the row after the last non-blank cell of column A
pub struct AppendOnly {
    pub sheet: String,
}

impl RecordWriter for AppendOnly {
    async fn write<S: SheetStore>(
        &self,
        store: &S,
        _cache: &SheetCache,
        record: &ProductionRecord,
    ) -> Result<()> {
        let column = store
            .get_range(&sheet_range(&self.sheet, "A:A"))
            .await
            .map_err(|e| BridgeError::store("failed to read production sheet", e))?;
        let last = column
            .iter()
            .rposition(|row| row.first().is_some_and(|c| !c.is_blank()))
            .map_or(0, |i| i + 1);
        let row = last + 1;

        store
            .update_range(
                &sheet_range(&self.sheet, &format!("A{}:G{}", row, row)),
                vec![record.to_row()],
                ValueInput::UserEntered,
            )
            .await
            .map_err(|e| {
                BridgeError::store("failed to update production sheet", e)
            })?;

        info!(
            "Production record for {} written to '{}' row {}",
            record.employee_name, self.sheet, row
        );
        Ok(())
    }
}

/// Rewrites the whole ledger sorted by date, one blank row between days
pub struct FullReflow {
    pub sheet: String,
}

fn padded(mut row: Vec<CellValue>) -> Vec<CellValue> {
    row.resize(LEDGER_COLUMNS.max(row.len()), CellValue::Empty);
    row
}

/// Merge `record` into the ledger contents read from the sheet
///
/// The first row is the header and is kept verbatim. Rows with a blank first
/// cell are dropped, the rest are stably sorted by date (rows without a
/// readable date go last, in their original order) and a blank row is
/// inserted wherever the date changes. The result is padded with blank rows
/// so it is never shorter than `existing`.
pub fn reflow_rows(existing: &Grid, record: &ProductionRecord) -> Grid {
    let header = existing.first().cloned().unwrap_or_default();

    let mut rows: Vec<Vec<CellValue>> = existing
        .iter()
        .skip(1)
        .filter(|row| row.first().is_some_and(|c| !c.is_blank()))
        .cloned()
        .collect();
    rows.push(record.to_row());

    let key = |row: &Vec<CellValue>| {
        let date = row.first().and_then(|c| parse_date(&c.text()));
        (date.is_none(), date)
    };
    rows.sort_by_key(key);

    let mut out: Grid = Vec::with_capacity(rows.len() * 2 + 1);
    out.push(padded(header));
    let mut previous = None;
    for row in rows {
        let current = key(&row);
        if previous.is_some_and(|p| p != current) {
            out.push(padded(Vec::new()));
        }
        previous = Some(current);
        out.push(padded(row));
    }
    while out.len() < existing.len() {
        out.push(padded(Vec::new()));
    }
    out
}

impl RecordWriter for FullReflow {
    async fn write<S: SheetStore>(
        &self,
        store: &S,
        cache: &SheetCache,
        record: &ProductionRecord,
    ) -> Result<()> {
        let existing = store
            .get_range(&sheet_range(&self.sheet, "A:G"))
            .await
            .map_err(|e| BridgeError::store("failed to read production sheet", e))?;

        let rows = reflow_rows(&existing, record);
        let width = rows.iter().map(Vec::len).max().unwrap_or(LEDGER_COLUMNS);
        let count = rows.len();
        let range = format!("A1:{}{}", column_to_letter(width as u32), count);

        store
            .update_range(
                &sheet_range(&self.sheet, &range),
                rows,
                ValueInput::UserEntered,
            )
            .await
            .map_err(|e| {
                BridgeError::store("failed to update production sheet", e)
            })?;
        info!(
            "Production record for {} merged into '{}' ({} rows)",
            record.employee_name, self.sheet, count
        );

        let sheet_id = cache.resolve_id(store, &self.sheet).await?;
        let format = StructuralRequest::Format {
            range: GridRange::new(sheet_id, (1, Some(count as u32)), (0, Some(width as u32))),
            format: CellFormat {
                horizontal_alignment: "CENTER".to_string(),
                font_family: "Arial".to_string(),
                font_size: 12,
            },
        };
        store
            .batch_update(vec![format])
            .await
            .map_err(|e| BridgeError::store("failed to apply formatting", e))
    }
}

/// The configured ledger writer
///
/// Both strategies read the sheet before writing it back, so writes through
/// one `Ledger` are serialised: a second record waits until the first one's
/// read, update and formatting have all finished.
pub struct Ledger {
    pub strategy: LedgerStrategy,
    pub sheet: String,
    lock: Mutex<()>,
}

impl Ledger {
    pub fn new(strategy: LedgerStrategy, sheet: impl Into<String>) -> Self {
        Ledger {
            strategy,
            sheet: sheet.into(),
            lock: Mutex::new(()),
        }
    }
}

impl RecordWriter for Ledger {
    async fn write<S: SheetStore>(
        &self,
        store: &S,
        cache: &SheetCache,
        record: &ProductionRecord,
    ) -> Result<()> {
        let _guard = self.lock.lock().await;
        let sheet = self.sheet.clone();
        match self.strategy {
            LedgerStrategy::AppendOnly => AppendOnly { sheet }.write(store, cache, record).await,
            LedgerStrategy::FullReflow => FullReflow { sheet }.write(store, cache, record).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASLOV_ROW: [&str; 7] = [
        "2024-01-15",
        "Маслов",
        "Гайка Сибирь",
        "20",
        "1",
        "19",
        "",
    ];

    fn record(date: &str, name: &str, total: u32, defective: Option<u32>) -> ProductionRecord {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
        ProductionRecord::new(date, name, "Гайка Сибирь", total, defective, "")
            .unwrap()
    }

    fn texts(grid: &Grid) -> Vec<Vec<String>> {
        grid.iter()
            .map(|row| row.iter().map(CellValue::text).collect())
            .collect()
    }

    fn grid(rows: &[&[&str]]) -> Grid {
        rows.iter().map(|row| row_of(*row)).collect()
    }

    #[test]
    fn good_parts_computed_server_side() {
        let r = record("2024-01-15", "Маслов", 10, Some(2));
        assert_eq!(r.good_parts(), 8);
        assert_eq!(record("2024-01-15", "Маслов", 10, None).good_parts(), 10);
    }

    #[test]
    fn rejects_more_defective_than_total() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let too_many = ProductionRecord::new(date, "Маслов", "Гайка", 3, Some(4), "");
        assert!(too_many.unwrap_err().is_validation());

        let blank_name = ProductionRecord::new(date, "  ", "Гайка", 3, None, "");
        assert!(blank_name.is_err());
        let blank_part = ProductionRecord::new(date, "Маслов", "", 3, None, "");
        assert!(blank_part.is_err());
    }

    #[test]
    fn count_parsing() {
        assert_eq!(parse_count("totalParts", " 20 ").unwrap(), 20);
        assert!(parse_count("totalParts", "-1").is_err());
        assert!(parse_count("totalParts", "2.5").is_err());
        assert!(parse_count("defective", "abc").is_err());
    }

    #[test]
    fn stored_row_layout() {
        let r = record("2024-01-15", "Маслов", 20, Some(1));
        let row: Vec<String> = r.to_row().iter().map(CellValue::text).collect();
        assert_eq!(row, MASLOV_ROW);
    }

    #[test]
    fn reflow_into_header_only_sheet() {
        let existing = grid(&[&["Дата", "ФИО"]]);
        let r = record("2024-01-15", "Маслов", 20, Some(1));
        let out = texts(&reflow_rows(&existing, &r));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], ["Дата", "ФИО", "", "", "", "", ""]);
        assert_eq!(out[1], MASLOV_ROW);
    }

    #[test]
    fn reflow_sorts_and_separates_days() {
        let existing = grid(&[
            &["Дата"],
            &["16.01.2024", "Иванов"],
            &[],
            &["14.01.2024", "Петров"],
            &["", "мусор"],
            &["позже", "Сидоров"],
            &["16.01.2024", "Козлов"],
        ]);
        let r = record("2024-01-15", "Маслов", 5, None);
        let out = texts(&reflow_rows(&existing, &r));
        let names: Vec<&str> = out.iter().map(|r| r[1].as_str()).collect();
        let expected = [
            "", "Петров", "", "Маслов", "", "Иванов", "Козлов", "", "Сидоров",
        ];
        assert_eq!(names, expected);
        assert!(out.iter().all(|r| r.len() == LEDGER_COLUMNS));
    }

    #[test]
    fn reflow_never_shrinks() {
        let existing = grid(&[
            &["Дата"],
            &["15.01.2024", "Иванов"],
            &[],
            &[],
            &[],
            &["15.01.2024", "Петров"],
        ]);
        let r = record("2024-01-15", "Маслов", 5, None);
        let out = texts(&reflow_rows(&existing, &r));
        assert_eq!(out.len(), existing.len());
        assert_eq!(out[3][1], "Маслов");
        assert!(out[4].iter().all(String::is_empty));
        assert!(out[5].iter().all(String::is_empty));
    }

    #[test]
    fn reflow_into_empty_sheet() {
        let r = record("2024-01-15", "Маслов", 5, None);
        let out = texts(&reflow_rows(&Vec::new(), &r));
        assert_eq!(out.len(), 2);
        assert!(out[0].iter().all(String::is_empty));
        assert_eq!(out[1][1], "Маслов");
    }
}
