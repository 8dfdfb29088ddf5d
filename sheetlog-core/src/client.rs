use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

const DEFAULT_DRIVE_BASE_URL: &str = "https://www.googleapis.com";
const DEFAULT_SHEETS_BASE_URL: &str = "https://sheets.googleapis.com";

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
pub const SPREADSHEET_MIME_TYPE: &str = "application/vnd.google-apps.spreadsheet";

/// Grid shape for sheets created through [`GoogleClient::add_sheets`].
const NEW_SHEET_ROWS: u32 = 1000;
const NEW_SHEET_COLUMNS: u32 = 7;

#[derive(Debug, Error)]
pub enum GoogleApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

/// Pixel width applied to a half-open column range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpan {
    pub start: u32,
    pub end: u32,
    pub pixels: u32,
}

impl ColumnSpan {
    pub const fn new(start: u32, end: u32, pixels: u32) -> Self {
        Self { start, end, pixels }
    }
}

#[derive(Clone)]
pub struct GoogleClient {
    http: Client,
    drive_base: Url,
    sheets_base: Url,
    token: String,
}

impl GoogleClient {
    pub fn new(token: impl Into<String>) -> Result<Self, GoogleApiError> {
        Self::with_base_urls(DEFAULT_DRIVE_BASE_URL, DEFAULT_SHEETS_BASE_URL, token)
    }

    pub fn with_base_urls(
        drive_base: &str,
        sheets_base: &str,
        token: impl Into<String>,
    ) -> Result<Self, GoogleApiError> {
        Ok(Self {
            http: Client::new(),
            drive_base: Url::parse(drive_base)?,
            sheets_base: Url::parse(sheets_base)?,
            token: token.into(),
        })
    }

    /// Lists files visible to the account, optionally restricted to the
    /// children of one parent folder.
    pub async fn list_files(
        &self,
        parent: Option<&str>,
        page_size: u32,
    ) -> Result<Vec<DriveFile>, GoogleApiError> {
        let mut url = self.drive_endpoint("/drive/v3/files")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("pageSize", &page_size.to_string());
            if let Some(parent) = parent {
                query.append_pair("q", &format!("'{parent}' in parents"));
            }
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let payload: FileList = Self::handle_response(response).await?;
        Ok(payload.files)
    }

    pub async fn create_folder(
        &self,
        name: &str,
        parent: &str,
    ) -> Result<DriveFile, GoogleApiError> {
        self.create_file(name, FOLDER_MIME_TYPE, parent).await
    }

    pub async fn create_spreadsheet(
        &self,
        name: &str,
        parent: &str,
    ) -> Result<DriveFile, GoogleApiError> {
        self.create_file(name, SPREADSHEET_MIME_TYPE, parent).await
    }

    async fn create_file(
        &self,
        name: &str,
        mime_type: &str,
        parent: &str,
    ) -> Result<DriveFile, GoogleApiError> {
        let url = self.drive_endpoint("/drive/v3/files")?;
        let body = CreateFileRequest {
            name,
            mime_type,
            parents: vec![parent],
        };
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn get_spreadsheet(
        &self,
        spreadsheet_id: &str,
        include_grid_data: bool,
    ) -> Result<Spreadsheet, GoogleApiError> {
        let mut url = self.sheets_endpoint(&format!("/v4/spreadsheets/{spreadsheet_id}"))?;
        if include_grid_data {
            url.query_pairs_mut().append_pair("includeGridData", "true");
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Appends rows after the last populated row of the named sheet.
    pub async fn append_row(
        &self,
        spreadsheet_id: &str,
        sheet_title: &str,
        rows: &[Vec<String>],
    ) -> Result<(), GoogleApiError> {
        let mut url = self.sheets_endpoint(&format!(
            "/v4/spreadsheets/{spreadsheet_id}/values/{sheet_title}!A1:append"
        ))?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&json!({ "values": rows }))
            .send()
            .await?;
        Self::check_response(response).await
    }

    pub async fn add_sheets(
        &self,
        spreadsheet_id: &str,
        titles: &[String],
    ) -> Result<BatchUpdateResponse, GoogleApiError> {
        let requests = titles
            .iter()
            .map(|title| {
                json!({
                    "addSheet": {
                        "properties": {
                            "title": title,
                            "gridProperties": {
                                "rowCount": NEW_SHEET_ROWS,
                                "columnCount": NEW_SHEET_COLUMNS,
                            }
                        }
                    }
                })
            })
            .collect();
        self.batch_update(spreadsheet_id, requests).await
    }

    pub async fn delete_sheet(
        &self,
        spreadsheet_id: &str,
        sheet_id: i64,
    ) -> Result<BatchUpdateResponse, GoogleApiError> {
        self.batch_update(
            spreadsheet_id,
            vec![json!({ "deleteSheet": { "sheetId": sheet_id } })],
        )
        .await
    }

    pub async fn rename_sheet(
        &self,
        spreadsheet_id: &str,
        sheet_id: i64,
        new_title: &str,
    ) -> Result<BatchUpdateResponse, GoogleApiError> {
        self.batch_update(
            spreadsheet_id,
            vec![json!({
                "updateSheetProperties": {
                    "properties": { "sheetId": sheet_id, "title": new_title },
                    "fields": "title",
                }
            })],
        )
        .await
    }

    pub async fn resize_columns(
        &self,
        spreadsheet_id: &str,
        sheet_id: i64,
        spans: &[ColumnSpan],
    ) -> Result<BatchUpdateResponse, GoogleApiError> {
        let requests = spans
            .iter()
            .map(|span| {
                json!({
                    "updateDimensionProperties": {
                        "range": {
                            "sheetId": sheet_id,
                            "dimension": "COLUMNS",
                            "startIndex": span.start,
                            "endIndex": span.end,
                        },
                        "properties": { "pixelSize": span.pixels },
                        "fields": "pixelSize",
                    }
                })
            })
            .collect();
        self.batch_update(spreadsheet_id, requests).await
    }

    async fn batch_update(
        &self,
        spreadsheet_id: &str,
        requests: Vec<Value>,
    ) -> Result<BatchUpdateResponse, GoogleApiError> {
        let url =
            self.sheets_endpoint(&format!("/v4/spreadsheets/{spreadsheet_id}:batchUpdate"))?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&json!({ "requests": requests }))
            .send()
            .await?;
        Self::handle_response(response).await
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn drive_endpoint(&self, path: &str) -> Result<Url, GoogleApiError> {
        Ok(self.drive_base.join(path)?)
    }

    fn sheets_endpoint(&self, path: &str) -> Result<Url, GoogleApiError> {
        Ok(self.sheets_base.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GoogleApiError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(GoogleApiError::Api { status, body })
        }
    }

    async fn check_response(response: reqwest::Response) -> Result<(), GoogleApiError> {
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(GoogleApiError::Api { status, body })
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateFileRequest<'a> {
    name: &'a str,
    mime_type: &'a str,
    parents: Vec<&'a str>,
}

#[derive(Debug, Deserialize, Serialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Spreadsheet {
    pub spreadsheet_id: String,
    #[serde(default)]
    pub sheets: Vec<Sheet>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Sheet {
    pub properties: SheetProperties,
    #[serde(default)]
    pub data: Vec<GridData>,
}

impl Sheet {
    /// Number of populated rows in the first grid slab, header included.
    /// Zero when grid data was not requested.
    pub fn populated_rows(&self) -> usize {
        self.data.first().map_or(0, |grid| grid.row_data.len())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetProperties {
    pub sheet_id: i64,
    pub title: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridData {
    #[serde(default)]
    pub row_data: Vec<RowData>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowData {
    #[serde(default)]
    pub values: Vec<CellData>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellData {
    #[serde(default)]
    pub formatted_value: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateResponse {
    pub spreadsheet_id: String,
    #[serde(default)]
    pub replies: Vec<Reply>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    #[serde(default)]
    pub add_sheet: Option<AddSheetReply>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AddSheetReply {
    pub properties: SheetProperties,
}
