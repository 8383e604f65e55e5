//! Google Sheets adapter (ledger writer).
//!
//! Implements the `exb-core` LedgerStore port by appending rows to one worksheet
//! through the Sheets v4 `values:append` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use exb_core::{errors::Error, expense::LedgerRow, ports::LedgerStore, Result};

pub mod auth;

use auth::{ServiceAccountKey, TokenProvider};

const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";

/// Google API hosts; overridable so tests can point at a local server.
#[derive(Clone, Debug)]
pub struct Endpoints {
    pub sheets: String,
    pub drive: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            sheets: "https://sheets.googleapis.com".to_string(),
            drive: "https://www.googleapis.com".to_string(),
        }
    }
}

/// Which spreadsheet/worksheet receives the rows.
#[derive(Clone, Debug)]
pub struct SheetsConfig {
    /// When set, skips the title lookup.
    pub spreadsheet_id: Option<String>,
    pub sheet_name: String,
    pub worksheet_name: String,
    pub timeout: Duration,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SheetProperties {
    title: String,
}

/// Append-only handle on one worksheet, opened once at startup.
pub struct SheetsLedger {
    http: reqwest::Client,
    auth: TokenProvider,
    endpoints: Endpoints,
    spreadsheet_id: String,
    worksheet_name: String,
}

impl SheetsLedger {
    pub async fn connect(creds_json: &str, cfg: SheetsConfig) -> Result<Self> {
        Self::connect_with(creds_json, cfg, Endpoints::default()).await
    }

    /// Authenticate, resolve the spreadsheet and check that the worksheet exists.
    pub async fn connect_with(
        creds_json: &str,
        cfg: SheetsConfig,
        endpoints: Endpoints,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;
        let auth = TokenProvider::new(ServiceAccountKey::from_json(creds_json)?, http.clone())?;

        let mut ledger = Self {
            http,
            auth,
            endpoints,
            spreadsheet_id: cfg.spreadsheet_id.clone().unwrap_or_default(),
            worksheet_name: cfg.worksheet_name.clone(),
        };

        if cfg.spreadsheet_id.is_none() {
            ledger.spreadsheet_id = ledger.find_spreadsheet(&cfg.sheet_name).await?;
        }
        ledger.ensure_worksheet().await?;

        tracing::info!(
            spreadsheet_id = %ledger.spreadsheet_id,
            worksheet = %ledger.worksheet_name,
            "ledger opened"
        );
        Ok(ledger)
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    async fn find_spreadsheet(&self, title: &str) -> Result<String> {
        let query = format!(
            "name = '{}' and mimeType = '{SPREADSHEET_MIME}' and trashed = false",
            escape_query_literal(title)
        );
        let token = self.auth.access_token().await?;

        let resp = self
            .http
            .get(format!("{}/drive/v3/files", self.endpoints.drive))
            .bearer_auth(token)
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id,name)"),
                ("pageSize", "1"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ])
            .send()
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("drive request error: {e}")))?;

        let list: FileList = read_json(resp, "drive file lookup").await?;
        list.files.into_iter().next().map(|f| f.id).ok_or_else(|| {
            Error::Config(format!(
                "spreadsheet '{title}' not found or not shared with {}",
                self.auth.client_email()
            ))
        })
    }

    async fn ensure_worksheet(&self) -> Result<()> {
        let token = self.auth.access_token().await?;
        let url = self.sheets_url(&[self.spreadsheet_id.as_str()])?;

        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(&[("fields", "sheets.properties.title")])
            .send()
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("sheets request error: {e}")))?;

        let meta: SpreadsheetMeta = read_json(resp, "spreadsheet metadata").await?;
        if meta
            .sheets
            .iter()
            .any(|s| s.properties.title == self.worksheet_name)
        {
            return Ok(());
        }
        Err(Error::Config(format!(
            "worksheet '{}' not found in spreadsheet {}",
            self.worksheet_name, self.spreadsheet_id
        )))
    }

    fn sheets_url(&self, tail: &[&str]) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.endpoints.sheets)
            .map_err(|e| Error::Config(format!("invalid sheets endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config("sheets endpoint cannot be a base url".to_string()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets"])
            .extend(tail);
        Ok(url)
    }

    fn append_url(&self) -> Result<reqwest::Url> {
        let range = format!("{}:append", a1_range(&self.worksheet_name));
        self.sheets_url(&[self.spreadsheet_id.as_str(), "values", range.as_str()])
    }
}

#[async_trait]
impl LedgerStore for SheetsLedger {
    async fn append_row(&self, row: &LedgerRow) -> Result<()> {
        let token = self.auth.access_token().await?;
        let body = serde_json::json!({
            "majorDimension": "ROWS",
            "values": [row.values()],
        });

        let resp = self
            .http
            .post(self.append_url()?)
            .bearer_auth(token)
            .query(&[
                ("valueInputOption", "RAW"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("sheets request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::ServiceUnavailable(format!(
                "sheets append failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }
        Ok(())
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response, what: &str) -> Result<T> {
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::ServiceUnavailable(format!(
            "{what} failed: {status} {}",
            body.chars().take(200).collect::<String>()
        )));
    }
    resp.json()
        .await
        .map_err(|e| Error::ServiceUnavailable(format!("{what} json error: {e}")))
}

/// `'Sheet name'!A1`, doubling embedded quotes per A1 notation.
fn a1_range(worksheet: &str) -> String {
    format!("'{}'!A1", worksheet.replace('\'', "''"))
}

/// Escape a string literal for a Drive `files.list` query.
fn escape_query_literal(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}
