use crate::error::{BridgeError, Result, StoreError};
use crate::locator::TimesheetLayout;
use crate::sheets::{SheetProperties, SheetStore, StructuralRequest};
use chrono::{Datelike, NaiveDate};
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Nominative month names as they appear in sheet titles
pub const MONTH_NAMES: [&str; 12] = [
    "Январь", "Февраль", "Март", "Апрель", "Май", "Июнь", "Июль", "Август", "Сентябрь", "Октябрь",
    "Ноябрь", "Декабрь",
];

/// Whether month-sheets other than the current one stay visible
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VisibilityMode {
    /// Only the month-sheet being written to is shown, right after the ledger
    SingleActive,
    /// Month-sheets are left as they are once created
    #[default]
    AllVisible,
}

/// Month name for a 1-based month number
pub fn month_name(month: u32) -> &'static str {
    MONTH_NAMES[((month.clamp(1, 12)) - 1) as usize]
}

/// Title of the month-sheet holding `date`, e.g. `Табель Март 2024`
///
/// Depends only on the year and month of `date`.
pub fn month_sheet_title(prefix: &str, date: NaiveDate) -> String {
    format!("{} {} {}", prefix, month_name(date.month()), date.year())
}

/// Heading stamped across the first row of a fresh month-sheet
pub fn month_sheet_heading(date: NaiveDate) -> String {
    format!(
        "Табель учета рабочего времени за {} {} год",
        month_name(date.month()),
        date.year()
    )
}

fn lowercase(s: &str) -> String {
    s.to_lowercase()
}

#[derive(Debug)]
struct CacheState {
    sheets: HashMap<String, i64>,
    template: SheetProperties,
}

impl CacheState {
    fn refresh(&mut self, listing: &[SheetProperties]) {
        self.sheets = listing
            .iter()
            .map(|s| (s.title.clone(), s.sheet_id))
            .collect();
        let template_id = self.template.sheet_id;
        if let Some(template) = listing.iter().find(|s| s.sheet_id == template_id) {
            self.template = template.clone();
        }
    }
}

/// Known sheet titles and the template month-sheet
///
/// Populated once at startup and refreshed whenever a lookup misses.
/// Readers share the lock; provisioning holds it exclusively for the whole
/// copy-and-prepare sequence so that racing requests produce one sheet.
#[derive(Debug)]
pub struct SheetCache {
    state: RwLock<CacheState>,
}

impl SheetCache {
    /// List the spreadsheet and pick the template sheet
    ///
    /// # Arguments
    /// * `store` - The spreadsheet store
    /// * `template_name` - Configured template title; an exact
    ///   case-insensitive match wins, otherwise the first title containing it
    ///
    /// # Returns
    /// * `Result<SheetCache>` - The loaded cache, or a `Config` error naming
    ///   the available titles when no template is found
    pub async fn load<S: SheetStore>(store: &S, template_name: &str) -> Result<SheetCache> {
        let listing = store
            .list_sheets()
            .await
            .map_err(|e| BridgeError::store("failed to list sheets", e))?;

        let wanted = lowercase(template_name.trim());
        let contains = |s: &&SheetProperties| lowercase(&s.title).contains(&wanted);
        let template = listing
            .iter()
            .find(|s| lowercase(&s.title) == wanted)
            .or_else(|| listing.iter().find(contains))
            .cloned()
            .ok_or_else(|| {
                let titles: Vec<&str> = listing.iter().map(|s| s.title.as_str()).collect();
                BridgeError::Config(format!(
                    "template sheet '{}' not found. Available: [{}]",
                    template_name,
                    titles.join(", ")
                ))
            })?;

        info!(
            "Loaded {} sheets, template '{}' (id {})",
            listing.len(),
            template.title,
            template.sheet_id
        );

        let mut state = CacheState {
            sheets: HashMap::new(),
            template,
        };
        state.refresh(&listing);
        Ok(SheetCache {
            state: RwLock::new(state),
        })
    }

    pub async fn contains(&self, title: &str) -> bool {
        self.state.read().await.sheets.contains_key(title)
    }

    pub async fn sheet_id(&self, title: &str) -> Option<i64> {
        self.state.read().await.sheets.get(title).copied()
    }

    pub async fn template(&self) -> SheetProperties {
        self.state.read().await.template.clone()
    }

    /// Id of `title`, re-listing the spreadsheet once on a miss
    pub async fn resolve_id<S: SheetStore>(&self, store: &S, title: &str) -> Result<i64> {
        if let Some(id) = self.sheet_id(title).await {
            return Ok(id);
        }

        let mut state = self.state.write().await;
        if let Some(id) = state.sheets.get(title) {
            return Ok(*id);
        }
        let listing = store
            .list_sheets()
            .await
            .map_err(|e| BridgeError::store("failed to list sheets", e))?;
        state.refresh(&listing);
        state.sheets.get(title).copied().ok_or_else(|| {
            BridgeError::store(
                format!("failed to find sheet '{}'", title),
                StoreError::Sheet(format!("sheet '{}' does not exist", title)),
            )
        })
    }
}

/// Creates month-sheets from the template and manages their visibility
#[derive(Clone, Debug)]
pub struct Provisioner {
    /// Title of the template, also the prefix of every month-sheet title
    pub prefix: String,
    /// The ledger sheet, never hidden
    pub production_sheet: String,
    pub layout: TimesheetLayout,
    pub mode: VisibilityMode,
}

impl Provisioner {
    pub fn new(
        prefix: impl Into<String>,
        production_sheet: impl Into<String>,
        layout: TimesheetLayout,
        mode: VisibilityMode,
    ) -> Self {
        Provisioner {
            prefix: prefix.into(),
            production_sheet: production_sheet.into(),
            layout,
            mode,
        }
    }

    pub fn title_for(&self, date: NaiveDate) -> String {
        month_sheet_title(&self.prefix, date)
    }

    fn is_month_sheet(&self, title: &str) -> bool {
        title != self.production_sheet && lowercase(title).starts_with(&lowercase(&self.prefix))
    }

    /// Make sure the month-sheet for `date` exists and return its title
    ///
    /// A cache hit costs no remote call. On a miss the exclusive lock is
    /// taken, the cache re-checked and refreshed from a live listing, and
    /// only a title still absent after that is provisioned.
    pub async fn ensure_month_sheet<S: SheetStore>(
        &self,
        store: &S,
        cache: &SheetCache,
        date: NaiveDate,
    ) -> Result<String> {
        let title = self.title_for(date);
        if cache.contains(&title).await {
            return Ok(title);
        }

        let mut state = cache.state.write().await;
        if state.sheets.contains_key(&title) {
            debug!("Sheet '{}' was created by a concurrent request", title);
            return Ok(title);
        }

        let listing = store
            .list_sheets()
            .await
            .map_err(|e| BridgeError::store("failed to list sheets", e))?;
        state.refresh(&listing);
        if state.sheets.contains_key(&title) {
            info!("Adopting existing sheet '{}'", title);
            return Ok(title);
        }

        let created = self
            .provision_month_sheet(store, &state.template, &listing, date)
            .await?;
        state.sheets.insert(created.title.clone(), created.sheet_id);
        Ok(title)
    }

    /// Copy the template into a new month-sheet for `date`
    ///
    /// Fails if a sheet with the target title is already in `listing`. After
    /// the copy, one batch renames it, hides the template, stamps the heading,
    /// clears the hours region and moves the copy to index 1. In
    /// [`VisibilityMode::SingleActive`] the batch also hides the other
    /// visible month-sheets. If the batch fails the copy is deleted.
    pub async fn provision_month_sheet<S: SheetStore>(
        &self,
        store: &S,
        template: &SheetProperties,
        listing: &[SheetProperties],
        date: NaiveDate,
    ) -> Result<SheetProperties> {
        let title = self.title_for(date);
        if listing.iter().any(|s| s.title == title) {
            return Err(BridgeError::store(
                "failed to create month sheet",
                StoreError::Sheet(format!("sheet '{}' already exists", title)),
            ));
        }

        info!(
            "Creating sheet '{}' from template '{}'",
            title, template.title
        );
        let copy = store
            .copy_sheet(template.sheet_id)
            .await
            .map_err(|e| BridgeError::store("failed to copy template sheet", e))?;

        let mut requests = vec![
            StructuralRequest::rename(copy.sheet_id, &title),
            StructuralRequest::SetValue {
                range: self.layout.title_region(copy.sheet_id),
                value: month_sheet_heading(date),
            },
            StructuralRequest::ClearValues {
                range: self.layout.data_region(copy.sheet_id),
            },
            StructuralRequest::reveal_at(copy.sheet_id, 1),
            StructuralRequest::set_hidden(template.sheet_id, true),
        ];
        if self.mode == VisibilityMode::SingleActive {
            requests.extend(
                listing
                    .iter()
                    .filter(|s| !s.hidden && s.sheet_id != template.sheet_id)
                    .filter(|s| self.is_month_sheet(&s.title))
                    .map(|s| StructuralRequest::set_hidden(s.sheet_id, true)),
            );
        }

        if let Err(e) = store.batch_update(requests).await {
            error!("Failed to prepare sheet '{}': {}", title, e);
            let cleanup = vec![StructuralRequest::DeleteSheet {
                sheet_id: copy.sheet_id,
            }];
            if let Err(cleanup_err) = store.batch_update(cleanup).await {
                warn!(
                    "Could not delete unfinished copy '{}' (id {}): {}",
                    copy.title, copy.sheet_id, cleanup_err
                );
            }
            return Err(BridgeError::store("failed to prepare month sheet", e));
        }

        info!("Sheet '{}' created (id {})", title, copy.sheet_id);
        Ok(SheetProperties {
            sheet_id: copy.sheet_id,
            title,
            index: 1,
            hidden: false,
        })
    }

    /// Show `title` right after the ledger and hide the other month-sheets
    ///
    /// Only acts in [`VisibilityMode::SingleActive`]. Nothing is sent when
    /// the sheets are already arranged that way.
    pub async fn ensure_visible<S: SheetStore>(&self, store: &S, title: &str) -> Result<()> {
        if self.mode == VisibilityMode::AllVisible {
            return Ok(());
        }

        let listing = store
            .list_sheets()
            .await
            .map_err(|e| BridgeError::store("failed to list sheets", e))?;
        let target = listing.iter().find(|s| s.title == title).ok_or_else(|| {
            BridgeError::store(
                "failed to switch sheet visibility",
                StoreError::Sheet(format!("sheet '{}' does not exist", title)),
            )
        })?;

        let mut requests = Vec::new();
        if target.hidden || target.index != 1 {
            requests.push(StructuralRequest::reveal_at(target.sheet_id, 1));
        }
        requests.extend(
            listing
                .iter()
                .filter(|s| s.sheet_id != target.sheet_id && !s.hidden)
                .filter(|s| self.is_month_sheet(&s.title))
                .map(|s| StructuralRequest::set_hidden(s.sheet_id, true)),
        );

        if requests.is_empty() {
            return Ok(());
        }
        debug!("Switching visible month sheet to '{}'", title);
        store
            .batch_update(requests)
            .await
            .map_err(|e| {
                BridgeError::store("failed to switch sheet visibility", e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheets::InMemorySheets;
    use crate::sheets::memory::Operation;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn provisioner(mode: VisibilityMode) -> Provisioner {
        Provisioner::new("Табель", "Выпуск", TimesheetLayout::default(), mode)
    }

    fn spreadsheet() -> InMemorySheets {
        let store = InMemorySheets::new();
        store.add_sheet("Выпуск");
        store.add_sheet("Табель");
        let heading = "Табель учета рабочего времени за Январь 2024 год";
        store.put("'Табель'!A1:B1", &[&[heading]]).unwrap();
        store
            .put("'Табель'!B4:B5", &[&["Иванов"], &["Бурлаков"]])
            .unwrap();
        store.put("'Табель'!C3:E3", &[&["1", "2", "3"]]).unwrap();
        store
            .put("'Табель'!C4:D5", &[&["8", "8"], &["7.5", ""]])
            .unwrap();
        store
    }

    #[test]
    fn titles_depend_only_on_month() {
        let title = |date| month_sheet_title("Табель", date);
        assert_eq!(title(day(2024, 3, 1)), "Табель Март 2024");
        for d in 1..=29 {
            assert_eq!(title(day(2024, 2, d)), "Табель Февраль 2024");
        }
        assert_eq!(title(day(2023, 12, 31)), "Табель Декабрь 2023");
        assert_eq!(
            month_sheet_heading(day(2024, 1, 9)),
            "Табель учета рабочего времени за Январь 2024 год"
        );
    }

    #[tokio::test]
    async fn template_lookup_is_case_insensitive() {
        let store = InMemorySheets::new();
        store.add_sheet("Выпуск");
        let id = store.add_sheet("ТАБЕЛЬ шаблон");

        let cache = SheetCache::load(&store, "табель шаблон").await.unwrap();
        assert_eq!(cache.template().await.sheet_id, id);

        let cache = SheetCache::load(&store, "Табель").await.unwrap();
        assert_eq!(cache.template().await.sheet_id, id);

        let err = SheetCache::load(&store, "График").await.unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
        assert!(err.to_string().contains("Выпуск"));
    }

    #[tokio::test]
    async fn provisions_a_clean_copy() {
        let store = spreadsheet();
        let cache = SheetCache::load(&store, "Табель").await.unwrap();
        let provisioner = provisioner(VisibilityMode::AllVisible);

        let title = provisioner
            .ensure_month_sheet(&store, &cache, day(2024, 3, 10))
            .await
            .unwrap();
        assert_eq!(title, "Табель Март 2024");
        assert!(cache.contains(&title).await);

        let sheet = store.sheet(&title).unwrap();
        assert_eq!(sheet.index, 1);
        assert!(!sheet.hidden);
        assert!(store.sheet("Табель").unwrap().hidden);

        // Names and day headers survive, hours are cleared
        assert_eq!(store.cell(&title, 2, 5).as_deref(), Some("Бурлаков"));
        assert_eq!(store.cell(&title, 5, 3).as_deref(), Some("3"));
        assert_eq!(store.cell(&title, 3, 4), None);
        assert_eq!(store.cell(&title, 3, 5), None);
        assert_eq!(
            store.cell(&title, 1, 1).as_deref(),
            Some("Табель учета рабочего времени за Март 2024 год")
        );
        assert_eq!(
            store.cell(&title, 26, 1).as_deref(),
            Some("Табель учета рабочего времени за Март 2024 год")
        );
        assert_eq!(store.calls(Operation::CopySheet), 1);
        assert_eq!(store.calls(Operation::BatchUpdate), 1);
    }

    #[tokio::test]
    async fn cache_hit_makes_no_remote_call() {
        let store = spreadsheet();
        let cache = SheetCache::load(&store, "Табель").await.unwrap();
        let provisioner = provisioner(VisibilityMode::AllVisible);

        provisioner
            .ensure_month_sheet(&store, &cache, day(2024, 3, 1))
            .await
            .unwrap();
        let listed = store.calls(Operation::ListSheets);
        provisioner
            .ensure_month_sheet(&store, &cache, day(2024, 3, 31))
            .await
            .unwrap();
        assert_eq!(store.calls(Operation::ListSheets), listed);
        assert_eq!(store.calls(Operation::CopySheet), 1);
    }

    #[tokio::test]
    async fn adopts_sheet_created_elsewhere() {
        let store = spreadsheet();
        let cache = SheetCache::load(&store, "Табель").await.unwrap();
        store.add_sheet("Табель Апрель 2024");

        let title = provisioner(VisibilityMode::AllVisible)
            .ensure_month_sheet(&store, &cache, day(2024, 4, 2))
            .await
            .unwrap();
        assert_eq!(title, "Табель Апрель 2024");
        assert_eq!(store.calls(Operation::CopySheet), 0);
        assert!(cache.contains(&title).await);
    }

    #[tokio::test]
    async fn refuses_to_overwrite_existing_title() {
        let store = spreadsheet();
        let cache = SheetCache::load(&store, "Табель").await.unwrap();
        let mut listing = store.list_sheets().await.unwrap();
        listing.push(SheetProperties {
            sheet_id: 99,
            title: "Табель Май 2024".to_string(),
            index: 3,
            hidden: false,
        });

        let template = cache.template().await;
        let err = provisioner(VisibilityMode::AllVisible)
            .provision_month_sheet(&store, &template, &listing, day(2024, 5, 1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(store.calls(Operation::CopySheet), 0);
    }

    #[tokio::test]
    async fn failed_batch_removes_the_copy() {
        let store = spreadsheet();
        let cache = SheetCache::load(&store, "Табель").await.unwrap();
        store.fail_next(Operation::BatchUpdate, 500);

        let err = provisioner(VisibilityMode::AllVisible)
            .ensure_month_sheet(&store, &cache, day(2024, 6, 1))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("failed to prepare month sheet"));
        assert!(!cache.contains("Табель Июнь 2024").await);
        assert_eq!(store.list_sheets().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn single_active_hides_previous_month() {
        let store = spreadsheet();
        let cache = SheetCache::load(&store, "Табель").await.unwrap();
        let provisioner = provisioner(VisibilityMode::SingleActive);

        provisioner
            .ensure_month_sheet(&store, &cache, day(2024, 1, 15))
            .await
            .unwrap();
        provisioner
            .ensure_month_sheet(&store, &cache, day(2024, 2, 15))
            .await
            .unwrap();
        assert!(store.sheet("Табель Январь 2024").unwrap().hidden);
        assert!(!store.sheet("Табель Февраль 2024").unwrap().hidden);
        assert!(!store.sheet("Выпуск").unwrap().hidden);

        provisioner
            .ensure_visible(&store, "Табель Январь 2024")
            .await
            .unwrap();
        let january = store.sheet("Табель Январь 2024").unwrap();
        assert!(!january.hidden);
        assert_eq!(january.index, 1);
        assert!(store.sheet("Табель Февраль 2024").unwrap().hidden);
        assert!(!store.sheet("Выпуск").unwrap().hidden);

        // Already arranged: no batch is sent
        let batches = store.calls(Operation::BatchUpdate);
        provisioner
            .ensure_visible(&store, "Табель Январь 2024")
            .await
            .unwrap();
        assert_eq!(store.calls(Operation::BatchUpdate), batches);
    }

    #[tokio::test]
    async fn all_visible_leaves_visibility_alone() {
        let store = spreadsheet();
        let cache = SheetCache::load(&store, "Табель").await.unwrap();
        let provisioner = provisioner(VisibilityMode::AllVisible);

        provisioner
            .ensure_month_sheet(&store, &cache, day(2024, 1, 15))
            .await
            .unwrap();
        provisioner
            .ensure_month_sheet(&store, &cache, day(2024, 2, 15))
            .await
            .unwrap();
        assert!(!store.sheet("Табель Январь 2024").unwrap().hidden);

        let batches = store.calls(Operation::BatchUpdate);
        provisioner
            .ensure_visible(&store, "Табель Январь 2024")
            .await
            .unwrap();
        assert_eq!(store.calls(Operation::BatchUpdate), batches);
        assert_eq!(store.calls(Operation::ListSheets), 3);
    }

    #[tokio::test]
    async fn resolve_id_refreshes_on_miss() {
        let store = spreadsheet();
        let cache = SheetCache::load(&store, "Табель").await.unwrap();
        let id = store.add_sheet("Склад");

        assert_eq!(cache.resolve_id(&store, "Склад").await.unwrap(), id);
        assert!(cache.resolve_id(&store, "Нет такого").await.is_err());
    }
}
