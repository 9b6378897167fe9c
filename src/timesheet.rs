use crate::address::CellAddress;
use crate::cell::CellValue;
use crate::error::{BridgeError, Result};
use crate::locator::{TimesheetLayout, locate};
use crate::month_sheet::{Provisioner, SheetCache};
use crate::sheets::{SheetStore, ValueInput};
use chrono::NaiveDate;
use log::info;
use thiserror::Error;

/// Hours worked by one employee on one day
#[derive(Clone, Debug, PartialEq)]
pub struct TimesheetEntry {
    pub date: NaiveDate,
    pub employee_name: String,
    pub hours: f64,
    /// Trimmed text as submitted; this is what lands in the cell
    pub raw_hours: String,
}

impl TimesheetEntry {
    pub fn new(date: NaiveDate, employee_name: &str, hours: &str) -> Result<Self> {
        let employee_name = employee_name.trim();
        if employee_name.is_empty() {
            return Err(BridgeError::Validation("Full name is required".to_string()));
        }
        let raw_hours = hours.trim();
        if raw_hours.is_empty() {
            return Err(BridgeError::Validation("Hours are required".to_string()));
        }

        Ok(TimesheetEntry {
            date,
            employee_name: employee_name.to_string(),
            hours: parse_hours(raw_hours)?,
            raw_hours: raw_hours.to_string(),
        })
    }
}

/// Parse and validate an hours value
///
/// A decimal comma is accepted. The value must lie in `0..=24` and be a
/// whole number of half hours.
pub fn parse_hours(raw: &str) -> Result<f64> {
    let hours: f64 = raw
        .trim()
        .replace(',', ".")
        .parse()
        .ok()
        .filter(|h: &f64| h.is_finite())
        .ok_or_else(|| {
            BridgeError::Validation("Hours must be a number".to_string())
        })?;

    if !(0.0..=24.0).contains(&hours) {
        return Err(BridgeError::Validation(
            "Hours must be between 0 and 24".to_string(),
        ));
    }
    if (hours * 2.0).fract() != 0.0 {
        return Err(BridgeError::Validation(
            "Hours must be in steps of 0.5".to_string(),
        ));
    }
    Ok(hours)
}

/// Make the month-sheet for `date` exist and, if configured, be the visible one
///
/// # Returns
/// * `Result<String>` - Title of the month-sheet
pub async fn prepare_sheet<S: SheetStore>(
    store: &S,
    cache: &SheetCache,
    provisioner: &Provisioner,
    date: NaiveDate,
) -> Result<String> {
    let title = provisioner.ensure_month_sheet(store, cache, date).await?;
    provisioner.ensure_visible(store, &title).await?;
    Ok(title)
}

/// Write `entry` into its cell on `sheet`
pub async fn write_hours<S: SheetStore>(
    store: &S,
    layout: &TimesheetLayout,
    sheet: &str,
    entry: &TimesheetEntry,
) -> Result<CellAddress> {
    let address = locate(store, layout, sheet, &entry.employee_name, entry.date).await?;
    store
        .update_range(
            &address.to_string(),
            vec![vec![CellValue::from(entry.raw_hours.as_str())]],
            ValueInput::UserEntered,
        )
        .await
        .map_err(|e| BridgeError::store("failed to update hours", e))?;

    info!(
        "Recorded {} hours for {} on {} at {}",
        entry.raw_hours, entry.employee_name, entry.date, address
    );
    Ok(address)
}

/// Failure of [`record_hours`], tagged with the step that failed
#[derive(Debug, Error)]
pub enum RecordHoursError {
    /// The month-sheet could not be provisioned or revealed
    #[error(transparent)]
    Prepare(BridgeError),
    /// The cell could not be located or written
    #[error(transparent)]
    Write(BridgeError),
}

/// Prepare the month-sheet, locate the cell and write the hours
pub async fn record_hours<S: SheetStore>(
    store: &S,
    cache: &SheetCache,
    provisioner: &Provisioner,
    entry: &TimesheetEntry,
) -> Result<CellAddress, RecordHoursError> {
    let sheet = prepare_sheet(store, cache, provisioner, entry.date)
        .await
        .map_err(RecordHoursError::Prepare)?;
    write_hours(store, &provisioner.layout, &sheet, entry)
        .await
        .map_err(RecordHoursError::Write)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_half_hour_steps() {
        assert_eq!(parse_hours("8").unwrap(), 8.0);
        assert_eq!(parse_hours(" 7.5 ").unwrap(), 7.5);
        assert_eq!(parse_hours("7,5").unwrap(), 7.5);
        assert_eq!(parse_hours("0").unwrap(), 0.0);
        assert_eq!(parse_hours("24").unwrap(), 24.0);
    }

    #[test]
    fn rejects_out_of_range_and_odd_steps() {
        for bad in ["24.5", "25", "-1", "7.25", "0.1"] {
            let err = parse_hours(bad).unwrap_err();
            assert!(err.is_validation(), "{} should be rejected", bad);
        }
        assert_eq!(
            parse_hours("25").unwrap_err().to_string(),
            "Hours must be between 0 and 24"
        );
    }

    #[test]
    fn rejects_non_numbers() {
        for bad in ["abc", "8h", "NaN", "inf"] {
            assert_eq!(
                parse_hours(bad).unwrap_err().to_string(),
                "Hours must be a number"
            );
        }
    }

    #[test]
    fn entry_keeps_submitted_text() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 5).unwrap();
        let entry = TimesheetEntry::new(date, " Бурлаков ", " 8 ").unwrap();
        assert_eq!(entry.employee_name, "Бурлаков");
        assert_eq!(entry.raw_hours, "8");
        assert_eq!(entry.hours, 8.0);
        assert!(TimesheetEntry::new(date, "", "8").is_err());
        assert!(TimesheetEntry::new(date, "Бурлаков", " ").is_err());
    }
}
