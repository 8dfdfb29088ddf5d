use sheetlog_core::{ColumnSpan, GoogleApiError, GoogleClient, SheetProperties};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;

use super::index::{FolderRecord, IndexError, IndexStore, SheetRecord, SpreadsheetRecord};

/// Header row written when a sheet is created.
pub const HEADER_ROW: [&str; 5] = [
    "current_date",
    "unix_time_to_date",
    "unix_time",
    "sub_sub_kind_name",
    "log_text",
];

/// Fixed pixel widths for the five log columns.
pub const LOG_COLUMN_SPANS: [ColumnSpan; 3] = [
    ColumnSpan::new(0, 2, 350),
    ColumnSpan::new(2, 2, 150),
    ColumnSpan::new(3, 5, 400),
];

/// The placeholder sheet every freshly created spreadsheet starts with.
const DEFAULT_SHEET_ID: i64 = 0;

const TIMEZONE_SUFFIX: &str = " GMT+07:00 (Indochina Time)";

const TIMESTAMP_FORMAT: &[FormatItem<'_>] = format_description!(
    "[weekday repr:short] [month repr:short] [day] [year] [hour]:[minute]:[second]"
);
const MONTH_FORMAT: &[FormatItem<'_>] = format_description!("[year]-[month]");

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("api error: {0}")]
    Api(#[from] GoogleApiError),
    #[error("timestamp out of range: {0}")]
    Timestamp(#[from] time::error::ComponentRange),
    #[error("time format error: {0}")]
    Format(#[from] time::error::Format),
    #[error("add-sheet response carried no sheet properties")]
    MissingAddSheetReply,
}

/// One validated log-append request.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub log_kind_name: String,
    pub sub_kind_name: String,
    pub sub_sub_kind_name: String,
    pub log_text: String,
    pub unix_time: i64,
}

/// Resolves a log entry to its remote append target, creating missing
/// folders, spreadsheets, and sheets on the way, and keeps the local index
/// in step with what it created. No rollback: the chain aborts at the first
/// failed call and the next request (or a full re-scan) repairs the rest.
pub struct ReconcileEngine {
    client: GoogleClient,
    index: IndexStore,
    root_folder_id: String,
}

impl ReconcileEngine {
    pub fn new(client: GoogleClient, index: IndexStore, root_folder_id: impl Into<String>) -> Self {
        Self {
            client,
            index,
            root_folder_id: root_folder_id.into(),
        }
    }

    pub async fn resolve_and_append(
        &self,
        entry: &LogEntry,
        now: OffsetDateTime,
    ) -> Result<(), EngineError> {
        let month = month_key(now)?;
        match self.index.find_folder_by_name(&entry.log_kind_name).await? {
            Some(folder) => self.resolve_spreadsheet(&folder, entry, now, &month).await,
            None => {
                let created = self
                    .client
                    .create_folder(&entry.log_kind_name, &self.root_folder_id)
                    .await?;
                self.index
                    .insert_folder(&FolderRecord {
                        id: created.id.clone(),
                        name: created.name.clone(),
                        parent_id: self.root_folder_id.clone(),
                    })
                    .await?;
                self.create_fresh_spreadsheet(&created.id, entry, now, &month)
                    .await
            }
        }
    }

    async fn resolve_spreadsheet(
        &self,
        folder: &FolderRecord,
        entry: &LogEntry,
        now: OffsetDateTime,
        month: &str,
    ) -> Result<(), EngineError> {
        let spreadsheets = self.index.list_spreadsheets_by_folder(&folder.id).await?;
        // A stale index can hold duplicates for one month; the first match
        // is treated as current.
        if let Some(current) = spreadsheets.iter().find(|record| record.name == month) {
            return self.resolve_sheet(current, entry, now).await;
        }
        match spreadsheets.first() {
            Some(prior) => self.roll_over_month(&folder.id, prior, entry, now, month).await,
            None => self.create_fresh_spreadsheet(&folder.id, entry, now, month).await,
        }
    }

    async fn resolve_sheet(
        &self,
        current: &SpreadsheetRecord,
        entry: &LogEntry,
        now: OffsetDateTime,
    ) -> Result<(), EngineError> {
        match self.index.find_sheet(&current.id, &entry.sub_kind_name).await? {
            Some(sheet) => {
                // row_length stays at its creation-time value on purpose;
                // appends do not maintain the counter.
                self.client
                    .append_row(&current.id, &sheet.title, &[data_row(entry, now)?])
                    .await?;
                Ok(())
            }
            None => {
                let response = self
                    .client
                    .add_sheets(&current.id, std::slice::from_ref(&entry.sub_kind_name))
                    .await?;
                let properties = added_sheet_properties(&response)?;
                self.index
                    .add_sheet_descriptor(
                        &current.id,
                        &SheetRecord {
                            sheet_id: properties.sheet_id,
                            title: properties.title.clone(),
                            row_length: 1,
                        },
                    )
                    .await?;
                self.client
                    .resize_columns(&current.id, properties.sheet_id, &LOG_COLUMN_SPANS)
                    .await?;
                self.client
                    .append_row(
                        &current.id,
                        &properties.title,
                        &[header_row(), data_row(entry, now)?],
                    )
                    .await?;
                Ok(())
            }
        }
    }

    /// No spreadsheet exists yet for this folder: the backend's default
    /// sheet is renamed to the sub-kind and header plus first row go
    /// straight into it.
    async fn create_fresh_spreadsheet(
        &self,
        folder_id: &str,
        entry: &LogEntry,
        now: OffsetDateTime,
        month: &str,
    ) -> Result<(), EngineError> {
        let created = self.client.create_spreadsheet(month, folder_id).await?;
        self.client
            .rename_sheet(&created.id, DEFAULT_SHEET_ID, &entry.sub_kind_name)
            .await?;
        self.client
            .append_row(
                &created.id,
                &entry.sub_kind_name,
                &[header_row(), data_row(entry, now)?],
            )
            .await?;
        index_remote_spreadsheet(&self.client, &self.index, &created.id, month, folder_id).await
    }

    /// The calendar month moved past the folder's most recent spreadsheet:
    /// create the new month's spreadsheet carrying over the prior month's
    /// sheet titles (structure, not data), then write header plus first row
    /// into the sheet matching the incoming sub-kind.
    async fn roll_over_month(
        &self,
        folder_id: &str,
        prior: &SpreadsheetRecord,
        entry: &LogEntry,
        now: OffsetDateTime,
        month: &str,
    ) -> Result<(), EngineError> {
        let created = self.client.create_spreadsheet(month, folder_id).await?;
        let titles: Vec<String> = prior.sheets.iter().map(|sheet| sheet.title.clone()).collect();
        if titles.is_empty() {
            self.client
                .rename_sheet(&created.id, DEFAULT_SHEET_ID, &entry.sub_kind_name)
                .await?;
        } else {
            self.client.add_sheets(&created.id, &titles).await?;
            self.client.delete_sheet(&created.id, DEFAULT_SHEET_ID).await?;
            if !titles.iter().any(|title| title == &entry.sub_kind_name) {
                self.client
                    .add_sheets(&created.id, std::slice::from_ref(&entry.sub_kind_name))
                    .await?;
            }
        }
        self.client
            .append_row(
                &created.id,
                &entry.sub_kind_name,
                &[header_row(), data_row(entry, now)?],
            )
            .await?;
        index_remote_spreadsheet(&self.client, &self.index, &created.id, month, folder_id).await
    }
}

/// Fetches a spreadsheet's full structure, resizes every sheet's columns,
/// and refreshes the index record with row counts read from the grid.
pub(crate) async fn index_remote_spreadsheet(
    client: &GoogleClient,
    index: &IndexStore,
    spreadsheet_id: &str,
    name: &str,
    folder_id: &str,
) -> Result<(), EngineError> {
    let remote = client.get_spreadsheet(spreadsheet_id, true).await?;
    let mut sheets = Vec::with_capacity(remote.sheets.len());
    for sheet in &remote.sheets {
        client
            .resize_columns(spreadsheet_id, sheet.properties.sheet_id, &LOG_COLUMN_SPANS)
            .await?;
        sheets.push(SheetRecord {
            sheet_id: sheet.properties.sheet_id,
            title: sheet.properties.title.clone(),
            row_length: sheet.populated_rows().saturating_sub(1) as i64,
        });
    }
    index
        .upsert_spreadsheet(&SpreadsheetRecord {
            id: spreadsheet_id.to_string(),
            name: name.to_string(),
            folder_id: folder_id.to_string(),
            sheets,
        })
        .await?;
    Ok(())
}

fn added_sheet_properties(
    response: &sheetlog_core::BatchUpdateResponse,
) -> Result<&SheetProperties, EngineError> {
    response
        .replies
        .first()
        .and_then(|reply| reply.add_sheet.as_ref())
        .map(|added| &added.properties)
        .ok_or(EngineError::MissingAddSheetReply)
}

pub fn header_row() -> Vec<String> {
    HEADER_ROW.iter().map(|cell| cell.to_string()).collect()
}

fn data_row(entry: &LogEntry, now: OffsetDateTime) -> Result<Vec<String>, EngineError> {
    let event_time = OffsetDateTime::from_unix_timestamp(entry.unix_time)?;
    Ok(vec![
        format_timestamp(now)?,
        format_timestamp(event_time)?,
        entry.unix_time.to_string(),
        entry.sub_sub_kind_name.clone(),
        entry.log_text.clone(),
    ])
}

/// Year-month key for the given instant, e.g. `2023-11`.
pub fn month_key(now: OffsetDateTime) -> Result<String, time::error::Format> {
    now.format(MONTH_FORMAT)
}

// The timezone suffix is a fixed label carried over from the service this
// replaces; timestamps themselves are UTC.
fn format_timestamp(instant: OffsetDateTime) -> Result<String, time::error::Format> {
    Ok(format!("{}{}", instant.format(TIMESTAMP_FORMAT)?, TIMEZONE_SUFFIX))
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
