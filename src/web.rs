#![cfg(not(tarpaulin_include))]

use log::{error, info};
use shopfloor_bridge::app::{self, AppState};
use shopfloor_bridge::config::Config;
use shopfloor_bridge::error::BridgeError;
use shopfloor_bridge::month_sheet::SheetCache;
use shopfloor_bridge::sheets::GoogleSheets;
use std::sync::Arc;

/// Main entry point for the bridge service
///
/// Loads configuration and credentials, checks that the spreadsheet is
/// reachable, loads the sheet cache and serves until Ctrl-C. Any failure
/// before serving aborts the process.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(env).init();
    let report = |e: &BridgeError| error!("{}", e);

    let config = Config::load().inspect_err(report)?;
    let credentials = config
        .load_credentials(|name| std::env::var(name).ok())
        .inspect_err(report)?;

    let store = GoogleSheets::new(
        config.spreadsheet_id.clone(),
        credentials,
        config.request_timeout(),
        config.retry_policy(),
    )?;
    store.verify_access().await.inspect_err(report)?;
    info!("Using spreadsheet {}", store.spreadsheet_id());

    let cache = SheetCache::load(&store, &config.timesheet_sheet)
        .await
        .inspect_err(report)?;

    let state = Arc::new(AppState::new(store, cache, &config));
    app::run(state, &config).await
}
