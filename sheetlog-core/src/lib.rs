mod client;
mod oauth;

pub use client::{
    AddSheetReply, BatchUpdateResponse, CellData, ColumnSpan, DriveFile, GoogleApiError,
    GoogleClient, GridData, Reply, RowData, Sheet, SheetProperties, Spreadsheet, FOLDER_MIME_TYPE,
    SPREADSHEET_MIME_TYPE,
};
pub use oauth::{GoogleOAuthClient, OAuthError, OAuthToken};
