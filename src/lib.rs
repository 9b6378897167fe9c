/*!
# Shop-floor Spreadsheet Bridge

An HTTP service that takes manual shop-floor data entry from a static web
form and writes it into a shared Google Sheets spreadsheet.

## Overview

Two kinds of records arrive from the form:

- production runs, merged into a ledger sheet (`Выпуск` by default);
- hours worked by one employee on one day, written into a single cell of
  that month's timesheet (`Табель <Месяц> <Год>`).

Month timesheets are created on demand by copying a template sheet.

## Architecture

### Spreadsheet access
- [`sheets::SheetStore`] - read, update, append, batch structural edits,
  list and copy sheets
- [`sheets::GoogleSheets`] - Sheets v4 REST client with service-account
  authentication and bounded retry of idempotent calls
- [`sheets::InMemorySheets`] - in-process store with the same semantics

### Core
- **locator**: maps an employee name and a date to a cell address
- **month_sheet**: month titles, the sheet cache and template provisioning
- **ledger**: production records and the append-only / full-reflow writers
- **timesheet**: hours validation and the provision, locate, write sequence

### Surface
- **app**: axum router, request validation, CORS and static files
  (feature `web`)
- **config**: `config.json` plus environment overrides

## Modules

- **address**: column letters and A1 ranges
- **cell**: loosely typed cell values normalised at the boundary
- **error**: error taxonomy shared by every module
*/

pub mod address;
#[cfg(feature = "web")]
pub mod app;
pub mod cell;
pub mod config;
pub mod error;
pub mod ledger;
pub mod locator;
pub mod month_sheet;
pub mod sheets;
pub mod timesheet;
