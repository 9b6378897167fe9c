use super::{CellFormat, GridRange, SheetProperties, SheetStore, StructuralRequest, ValueInput};
use crate::address::A1Range;
use crate::cell::{CellValue, Grid};
use crate::error::StoreError;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Store operations, used for call accounting and failure injection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    GetRange,
    UpdateRange,
    AppendRow,
    BatchUpdate,
    ListSheets,
    CopySheet,
}

#[derive(Clone, Debug)]
struct MemSheet {
    props: SheetProperties,
    // (row, col), zero-based
    cells: BTreeMap<(u32, u32), String>,
    formats: Vec<(GridRange, CellFormat)>,
}

impl MemSheet {
    fn extent(&self) -> (u32, u32) {
        let rows = self.cells.keys().map(|(r, _)| r + 1).max().unwrap_or(0);
        let cols = self.cells.keys().map(|(_, c)| c + 1).max().unwrap_or(0);
        (rows, cols)
    }
}

#[derive(Default)]
struct MemState {
    sheets: Vec<MemSheet>,
    next_id: i64,
    calls: Vec<Operation>,
    failures: Vec<(Operation, u16)>,
}

impl MemState {
    fn sheet_by_title(&self, title: &str) -> Result<usize, StoreError> {
        self.sheets
            .iter()
            .position(|s| s.props.title == title)
            .ok_or_else(|| StoreError::Api {
                status: 400,
                message: format!("Unable to parse range: {}", title),
            })
    }

    fn sheet_by_id(&self, sheet_id: i64) -> Result<usize, StoreError> {
        self.sheets
            .iter()
            .position(|s| s.props.sheet_id == sheet_id)
            .ok_or_else(|| StoreError::Api {
                status: 400,
                message: format!("No grid with id: {}", sheet_id),
            })
    }

    fn resolve(&self, range: &str) -> Result<(usize, A1Range), StoreError> {
        let parsed = A1Range::parse(range).map_err(|message| StoreError::Api {
            status: 400,
            message,
        })?;
        let title = parsed.sheet.clone().ok_or_else(|| StoreError::Api {
            status: 400,
            message: format!("Range '{}' has no sheet name", range),
        })?;
        Ok((self.sheet_by_title(&title)?, parsed))
    }

    fn record(&mut self, op: Operation) -> Result<(), StoreError> {
        self.calls.push(op);
        if let Some(pos) = self.failures.iter().position(|(o, _)| *o == op) {
            let (_, status) = self.failures.remove(pos);
            return Err(StoreError::Api {
                status,
                message: format!("injected {:?} failure", op),
            });
        }
        Ok(())
    }

    fn reindex(&mut self) {
        for (i, sheet) in self.sheets.iter_mut().enumerate() {
            sheet.props.index = i as u32;
        }
    }

    fn apply(&mut self, request: &StructuralRequest) -> Result<(), StoreError> {
        match request {
            StructuralRequest::UpdateProperties {
                sheet_id,
                title,
                hidden,
                index,
            } => {
                let pos = self.sheet_by_id(*sheet_id)?;
                if let Some(title) = title {
                    let taken = self
                        .sheets
                        .iter()
                        .any(|s| s.props.sheet_id != *sheet_id && s.props.title == *title);
                    if taken {
                        return Err(StoreError::Api {
                            status: 400,
                            message: format!(
                                "A sheet with the name \"{}\" already exists. Please enter another name.",
                                title
                            ),
                        });
                    }
                    self.sheets[pos].props.title = title.clone();
                }
                if let Some(hidden) = hidden {
                    self.sheets[pos].props.hidden = *hidden;
                }
                if let Some(index) = index {
                    let sheet = self.sheets.remove(pos);
                    let at = (*index as usize).min(self.sheets.len());
                    self.sheets.insert(at, sheet);
                }
                self.reindex();
            }
            StructuralRequest::SetValue { range, value } => {
                let pos = self.sheet_by_id(range.sheet_id)?;
                let (rows, cols) = self.sheets[pos].extent();
                let end_row = range.end_row.unwrap_or(rows);
                let end_col = range.end_col.unwrap_or(cols);
                for r in range.start_row..end_row {
                    for c in range.start_col..end_col {
                        self.sheets[pos].cells.insert((r, c), value.clone());
                    }
                }
            }
            StructuralRequest::ClearValues { range } => {
                let pos = self.sheet_by_id(range.sheet_id)?;
                self.sheets[pos].cells.retain(|(r, c), _| !range.contains(*r, *c));
            }
            StructuralRequest::Format { range, format } => {
                let pos = self.sheet_by_id(range.sheet_id)?;
                self.sheets[pos].formats.push((range.clone(), format.clone()));
            }
            StructuralRequest::DeleteSheet { sheet_id } => {
                let pos = self.sheet_by_id(*sheet_id)?;
                self.sheets.remove(pos);
                self.reindex();
            }
        }
        Ok(())
    }
}

/// In-process [`SheetStore`]
///
/// Mirrors the observable behaviour of the Sheets API closely enough for the
/// bridge: A1 ranges with quoted titles, trailing-blank trimming on reads,
/// bounded writes, unique titles, atomic batch updates and "Copy of …"
/// titles for duplicated sheets. Failures can be injected per operation.
#[derive(Default)]
pub struct InMemorySheets {
    state: Mutex<MemState>,
}

impl InMemorySheets {
    pub fn new() -> Self {
        InMemorySheets::default()
    }

    fn state(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an empty visible sheet at the end and return its id
    pub fn add_sheet(&self, title: &str) -> i64 {
        let mut state = self.state();
        let sheet_id = state.next_id;
        state.next_id += 1;
        let index = state.sheets.len() as u32;
        state.sheets.push(MemSheet {
            props: SheetProperties {
                sheet_id,
                title: title.to_string(),
                index,
                hidden: false,
            },
            cells: BTreeMap::new(),
            formats: Vec::new(),
        });
        sheet_id
    }

    /// Fill cells starting at the top-left of `range`; empty strings clear
    pub fn put(&self, range: &str, rows: &[&[&str]]) -> Result<(), StoreError> {
        let grid: Grid = rows
            .iter()
            .map(|row| row.iter().map(|v| CellValue::from(*v)).collect())
            .collect();
        let mut state = self.state();
        let (pos, parsed) = state.resolve(range)?;
        write_grid(&mut state.sheets[pos], &parsed, &grid, false)
    }

    /// Text of a single cell (1-based column and row), `None` when empty
    pub fn cell(&self, sheet: &str, column: u32, row: u32) -> Option<String> {
        let state = self.state();
        let pos = state.sheet_by_title(sheet).ok()?;
        let key = (row.checked_sub(1)?, column.checked_sub(1)?);
        state.sheets[pos].cells.get(&key).cloned()
    }

    /// All values of a sheet as strings, trimmed like a range read
    pub fn values(&self, sheet: &str) -> Vec<Vec<String>> {
        let state = self.state();
        let Ok(pos) = state.sheet_by_title(sheet) else {
            return Vec::new();
        };
        let s = &state.sheets[pos];
        let (rows, cols) = s.extent();
        read_block(s, 0, rows, 0, cols)
            .into_iter()
            .map(|row| row.iter().map(CellValue::text).collect())
            .collect()
    }

    pub fn sheet(&self, title: &str) -> Option<SheetProperties> {
        let state = self.state();
        let pos = state.sheet_by_title(title).ok()?;
        Some(state.sheets[pos].props.clone())
    }

    pub fn formats(&self, title: &str) -> Vec<(GridRange, CellFormat)> {
        let state = self.state();
        match state.sheet_by_title(title) {
            Ok(pos) => state.sheets[pos].formats.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Number of times `op` was invoked
    pub fn calls(&self, op: Operation) -> usize {
        self.state().calls.iter().filter(|o| **o == op).count()
    }

    /// Make the next call of `op` fail with an API error carrying `status`
    pub fn fail_next(&self, op: Operation, status: u16) {
        self.state().failures.push((op, status));
    }
}

fn read_block(sheet: &MemSheet, row_from: u32, row_to: u32, col_from: u32, col_to: u32) -> Grid {
    let mut grid: Grid = (row_from..row_to)
        .map(|r| {
            let mut row: Vec<CellValue> = (col_from..col_to)
                .map(|c| {
                    sheet
                        .cells
                        .get(&(r, c))
                        .map(|v| CellValue::from(v.as_str()))
                        .unwrap_or_default()
                })
                .collect();
            while row.last().is_some_and(|c| *c == CellValue::Empty) {
                row.pop();
            }
            row
        })
        .collect();
    while grid.last().is_some_and(|row| row.is_empty()) {
        grid.pop();
    }
    grid
}

fn write_grid(
    sheet: &mut MemSheet,
    range: &A1Range,
    grid: &Grid,
    bounded: bool,
) -> Result<(), StoreError> {
    let top = range.start_row.unwrap_or(1) - 1;
    let left = range.start_col.unwrap_or(1) - 1;

    if bounded {
        if let Some(end_row) = range.end_row {
            if top + grid.len() as u32 > end_row {
                return Err(StoreError::Api {
                    status: 400,
                    message: format!(
                        "Requested writing within range, but tried writing to row [{}]",
                        top + grid.len() as u32
                    ),
                });
            }
        }
        if let Some(end_col) = range.end_col {
            let widest = grid.iter().map(Vec::len).max().unwrap_or(0) as u32;
            if left + widest > end_col {
                return Err(StoreError::Api {
                    status: 400,
                    message: format!(
                        "Requested writing within range, but tried writing to column [{}]",
                        left + widest
                    ),
                });
            }
        }
    }

    for (r, row) in grid.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            let key = (top + r as u32, left + c as u32);
            match value {
                CellValue::Empty => {
                    sheet.cells.remove(&key);
                }
                other => {
                    sheet.cells.insert(key, other.text());
                }
            }
        }
    }
    Ok(())
}

impl SheetStore for InMemorySheets {
    async fn get_range(&self, range: &str) -> Result<Grid, StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.record(Operation::GetRange)?;
        let (pos, parsed) = state.resolve(range)?;
        let sheet = &state.sheets[pos];
        let (rows, cols) = sheet.extent();

        let row_from = parsed.start_row.unwrap_or(1) - 1;
        let row_to = parsed.end_row.unwrap_or(rows).max(row_from);
        let col_from = parsed.start_col.unwrap_or(1) - 1;
        let col_to = parsed.end_col.unwrap_or(cols).max(col_from);
        Ok(read_block(sheet, row_from, row_to, col_from, col_to))
    }

    async fn update_range(
        &self,
        range: &str,
        rows: Grid,
        _input: ValueInput,
    ) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.record(Operation::UpdateRange)?;
        let (pos, parsed) = state.resolve(range)?;
        write_grid(&mut state.sheets[pos], &parsed, &rows, true)
    }

    async fn append_row(&self, range: &str, row: Vec<CellValue>) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.record(Operation::AppendRow)?;
        let (pos, parsed) = state.resolve(range)?;

        let col_from = parsed.start_col.unwrap_or(1) - 1;
        let col_to = parsed.end_col.unwrap_or(u32::MAX);
        let last = state.sheets[pos]
            .cells
            .keys()
            .filter(|(_, c)| *c >= col_from && *c < col_to)
            .map(|(r, _)| r + 1)
            .max()
            .unwrap_or(0);

        let target = A1Range {
            sheet: parsed.sheet.clone(),
            start_col: Some(col_from + 1),
            start_row: Some(last + 1),
            end_col: None,
            end_row: None,
        };
        write_grid(&mut state.sheets[pos], &target, &vec![row], false)
    }

    async fn batch_update(&self, requests: Vec<StructuralRequest>) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.record(Operation::BatchUpdate)?;

        let snapshot = state.sheets.clone();
        for request in &requests {
            if let Err(e) = state.apply(request) {
                state.sheets = snapshot;
                return Err(e);
            }
        }
        if !state.sheets.is_empty() && state.sheets.iter().all(|s| s.props.hidden) {
            state.sheets = snapshot;
            return Err(StoreError::Api {
                status: 400,
                message: "You can't hide all the sheets in a document.".to_string(),
            });
        }
        Ok(())
    }

    async fn list_sheets(&self) -> Result<Vec<SheetProperties>, StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.record(Operation::ListSheets)?;
        Ok(state.sheets.iter().map(|s| s.props.clone()).collect())
    }

    async fn copy_sheet(&self, sheet_id: i64) -> Result<SheetProperties, StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.record(Operation::CopySheet)?;
        let pos = state.sheet_by_id(sheet_id)?;

        let mut copy = state.sheets[pos].clone();
        let base = format!("Copy of {}", copy.props.title);
        let mut title = base.clone();
        let mut n = 2;
        while state.sheets.iter().any(|s| s.props.title == title) {
            title = format!("{} {}", base, n);
            n += 1;
        }

        copy.props.sheet_id = state.next_id;
        state.next_id += 1;
        copy.props.title = title;
        for (range, _) in copy.formats.iter_mut() {
            range.sheet_id = copy.props.sheet_id;
        }
        state.sheets.push(copy);
        state.reindex();
        Ok(state.sheets[state.sheets.len() - 1].props.clone())
    }
}
