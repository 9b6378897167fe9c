use super::auth::{ServiceAccountKey, TokenProvider};
use super::retry::RetryPolicy;
use super::{CellFormat, GridRange, SheetProperties, SheetStore, StructuralRequest, ValueInput};
use crate::cell::{CellValue, Grid};
use crate::error::{BridgeError, StoreError};
use log::{debug, info};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;
use urlencoding::encode;

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// [`SheetStore`] backed by the Google Sheets v4 REST API
///
/// Every call carries the client-wide timeout. Idempotent reads and value
/// updates go through the [`RetryPolicy`]; appends, copies and batch
/// updates are sent exactly once.
pub struct GoogleSheets {
    http: reqwest::Client,
    tokens: TokenProvider,
    spreadsheet_id: String,
    retry: RetryPolicy,
    base_url: String,
}

#[derive(Deserialize)]
struct ValueRangeResponse {
    #[serde(default)]
    values: Grid,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SpreadsheetResponse {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

impl GoogleSheets {
    pub fn new(
        spreadsheet_id: impl Into<String>,
        key: ServiceAccountKey,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, BridgeError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                BridgeError::Config(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(GoogleSheets {
            http,
            tokens: TokenProvider::new(key, timeout)?,
            spreadsheet_id: spreadsheet_id.into(),
            retry,
            base_url: SHEETS_API.to_string(),
        })
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    /// Check that the service account can open the spreadsheet
    pub async fn verify_access(&self) -> Result<(), BridgeError> {
        let url = format!(
            "{}/{}?fields=spreadsheetId",
            self.base_url, self.spreadsheet_id
        );
        self.retry
            .run("verify access", || self.call(Method::GET, &url, None))
            .await
            .map_err(|e| BridgeError::store("failed to access spreadsheet", e))?;
        info!(
            "Spreadsheet access verified successfully (as {})",
            self.tokens.client_email()
        );
        Ok(())
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/{}/values/{}",
            self.base_url,
            self.spreadsheet_id,
            encode(range)
        )
    }

    async fn call(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Value, StoreError> {
        let token = self.tokens.access_token().await?;
        debug!("{} {}", method, url);

        let mut request = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(from_reqwest)?;
        let status = response.status();
        let text = response.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(StoreError::Api {
                status: status.as_u16(),
                message: api_error_message(&text),
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(decode_error)
    }
}

impl SheetStore for GoogleSheets {
    async fn get_range(&self, range: &str) -> Result<Grid, StoreError> {
        let url = self.values_url(range);
        let body = self
            .retry
            .run("get range", || self.call(Method::GET, &url, None))
            .await?;
        let parsed: ValueRangeResponse = serde_json::from_value(body).map_err(decode_error)?;
        Ok(parsed.values)
    }

    async fn update_range(
        &self,
        range: &str,
        rows: Grid,
        input: ValueInput,
    ) -> Result<(), StoreError> {
        let url = format!(
            "{}?valueInputOption={}",
            self.values_url(range),
            input.as_api_str()
        );
        let body = json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": grid_to_json(&rows),
        });
        self.retry
            .run("update range", || self.call(Method::PUT, &url, Some(&body)))
            .await?;
        Ok(())
    }

    async fn append_row(&self, range: &str, row: Vec<CellValue>) -> Result<(), StoreError> {
        let url = format!(
            "{}:append?valueInputOption=USER_ENTERED&insertDataOption=INSERT_ROWS",
            self.values_url(range)
        );
        let body = json!({ "values": grid_to_json(&vec![row]) });
        self.call(Method::POST, &url, Some(&body)).await?;
        Ok(())
    }

    async fn batch_update(&self, requests: Vec<StructuralRequest>) -> Result<(), StoreError> {
        if requests.is_empty() {
            return Ok(());
        }
        let url = format!("{}/{}:batchUpdate", self.base_url, self.spreadsheet_id);
        let body = json!({
            "requests": requests.iter().map(request_to_json).collect::<Vec<_>>(),
        });
        self.call(Method::POST, &url, Some(&body)).await?;
        Ok(())
    }

    async fn list_sheets(&self) -> Result<Vec<SheetProperties>, StoreError> {
        let url = format!(
            "{}/{}?fields={}",
            self.base_url,
            self.spreadsheet_id,
            encode("sheets.properties(sheetId,title,index,hidden)")
        );
        let body = self
            .retry
            .run("list sheets", || self.call(Method::GET, &url, None))
            .await?;
        let parsed: SpreadsheetResponse = serde_json::from_value(body).map_err(decode_error)?;
        Ok(parsed.sheets.into_iter().map(|s| s.properties).collect())
    }

    async fn copy_sheet(&self, sheet_id: i64) -> Result<SheetProperties, StoreError> {
        let url = format!(
            "{}/{}/sheets/{}:copyTo",
            self.base_url, self.spreadsheet_id, sheet_id
        );
        let body = json!({ "destinationSpreadsheetId": self.spreadsheet_id });
        let response = self.call(Method::POST, &url, Some(&body)).await?;
        serde_json::from_value(response).map_err(decode_error)
    }
}

fn from_reqwest(e: reqwest::Error) -> StoreError {
    if e.is_timeout() {
        StoreError::Timeout
    } else {
        StoreError::Http(e)
    }
}

fn decode_error(e: serde_json::Error) -> StoreError {
    StoreError::Decode(e.to_string())
}

/// Pull `error.message` out of a Google API error body
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

fn grid_to_json(rows: &Grid) -> Value {
    Value::Array(
        rows.iter()
            .map(|row| {
                Value::Array(
                    row.iter()
                        .map(|cell| match cell {
                            // An empty string clears the cell on update
                            CellValue::Empty => Value::String(String::new()),
                            CellValue::Text(s) => Value::String(s.clone()),
                            CellValue::Number(n) => json!(n),
                        })
                        .collect(),
                )
            })
            .collect(),
    )
}

fn grid_range_to_json(range: &GridRange) -> Value {
    let mut map = Map::new();
    map.insert("sheetId".into(), json!(range.sheet_id));
    map.insert("startRowIndex".into(), json!(range.start_row));
    if let Some(end) = range.end_row {
        map.insert("endRowIndex".into(), json!(end));
    }
    map.insert("startColumnIndex".into(), json!(range.start_col));
    if let Some(end) = range.end_col {
        map.insert("endColumnIndex".into(), json!(end));
    }
    Value::Object(map)
}

fn format_to_json(format: &CellFormat) -> Value {
    json!({
        "horizontalAlignment": format.horizontal_alignment,
        "textFormat": {
            "fontFamily": format.font_family,
            "fontSize": format.font_size,
        },
    })
}

fn request_to_json(request: &StructuralRequest) -> Value {
    match request {
        StructuralRequest::UpdateProperties {
            sheet_id,
            title,
            hidden,
            index,
        } => {
            let mut properties = Map::new();
            let mut fields = Vec::new();
            properties.insert("sheetId".into(), json!(sheet_id));
            if let Some(title) = title {
                properties.insert("title".into(), json!(title));
                fields.push("title");
            }
            if let Some(hidden) = hidden {
                properties.insert("hidden".into(), json!(hidden));
                fields.push("hidden");
            }
            if let Some(index) = index {
                properties.insert("index".into(), json!(index));
                fields.push("index");
            }
            json!({
                "updateSheetProperties": {
                    "properties": properties,
                    "fields": fields.join(","),
                }
            })
        }
        StructuralRequest::SetValue { range, value } => json!({
            "repeatCell": {
                "range": grid_range_to_json(range),
                "cell": { "userEnteredValue": { "stringValue": value } },
                "fields": "userEnteredValue",
            }
        }),
        StructuralRequest::ClearValues { range } => json!({
            "repeatCell": {
                "range": grid_range_to_json(range),
                "cell": {},
                "fields": "userEnteredValue",
            }
        }),
        StructuralRequest::Format { range, format } => json!({
            "repeatCell": {
                "range": grid_range_to_json(range),
                "cell": { "userEnteredFormat": format_to_json(format) },
                "fields": "userEnteredFormat(horizontalAlignment,textFormat)",
            }
        }),
        StructuralRequest::DeleteSheet { sheet_id } => json!({
            "deleteSheet": { "sheetId": sheet_id }
        }),
    }
}
