use sheetlog_core::{DriveFile, GoogleApiError, GoogleClient};
use thiserror::Error;
use time::OffsetDateTime;

use super::engine::{index_remote_spreadsheet, month_key};
use super::index::{FolderRecord, IndexError, IndexStore, SheetRecord, SpreadsheetRecord};

const LIST_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("api error: {0}")]
    Api(#[from] GoogleApiError),
    #[error("time format error: {0}")]
    Format(#[from] time::error::Format),
    #[error("configured root folder {0} is not visible to this account")]
    RootNotFound(String),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub folders: usize,
    pub spreadsheets: usize,
}

/// Rebuilds the local index from the remote hierarchy, once per process
/// start. Best-effort: individual spreadsheets that fail to index are
/// logged and skipped, only a missing root folder aborts the walk.
pub struct Synchronizer {
    client: GoogleClient,
    index: IndexStore,
    root_folder_id: String,
}

impl Synchronizer {
    pub fn new(client: GoogleClient, index: IndexStore, root_folder_id: impl Into<String>) -> Self {
        Self {
            client,
            index,
            root_folder_id: root_folder_id.into(),
        }
    }

    pub async fn run(&self, now: OffsetDateTime) -> Result<SyncSummary, SyncError> {
        let month = month_key(now)?;

        let visible = self.client.list_files(None, LIST_PAGE_SIZE).await?;
        if !visible.iter().any(|file| file.id == self.root_folder_id) {
            return Err(SyncError::RootNotFound(self.root_folder_id.clone()));
        }

        self.index.clear().await?;
        let mut summary = SyncSummary::default();

        let folders = self
            .client
            .list_files(Some(&self.root_folder_id), LIST_PAGE_SIZE)
            .await?;
        for folder in &folders {
            self.index
                .insert_folder(&FolderRecord {
                    id: folder.id.clone(),
                    name: folder.name.clone(),
                    parent_id: self.root_folder_id.clone(),
                })
                .await?;
            summary.folders += 1;
        }

        for folder in &folders {
            let files = match self.client.list_files(Some(&folder.id), LIST_PAGE_SIZE).await {
                Ok(files) => files,
                Err(err) => {
                    eprintln!(
                        "[sheetlogd] startup sync: listing folder {} failed: {err}",
                        folder.name
                    );
                    continue;
                }
            };
            for file in files {
                // The current month's spreadsheet is indexed with its grid
                // row counts; older ones only need their sheet titles, kept
                // around to seed the next month rollover.
                let result = if file.name == month {
                    index_remote_spreadsheet(
                        &self.client,
                        &self.index,
                        &file.id,
                        &file.name,
                        &folder.id,
                    )
                    .await
                    .map_err(|err| err.to_string())
                } else {
                    self.index_structure_only(&file, &folder.id)
                        .await
                        .map_err(|err| err.to_string())
                };
                match result {
                    Ok(()) => summary.spreadsheets += 1,
                    Err(err) => eprintln!(
                        "[sheetlogd] startup sync: indexing {} failed: {err}",
                        file.name
                    ),
                }
            }
        }

        Ok(summary)
    }

    async fn index_structure_only(
        &self,
        file: &DriveFile,
        folder_id: &str,
    ) -> Result<(), SyncError> {
        let remote = self.client.get_spreadsheet(&file.id, false).await?;
        let sheets = remote
            .sheets
            .iter()
            .map(|sheet| SheetRecord {
                sheet_id: sheet.properties.sheet_id,
                title: sheet.properties.title.clone(),
                row_length: 0,
            })
            .collect();
        self.index
            .upsert_spreadsheet(&SpreadsheetRecord {
                id: file.id.clone(),
                name: file.name.clone(),
                folder_id: folder_id.to_string(),
                sheets,
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use sqlx::SqlitePool;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn fixed_now() -> OffsetDateTime {
        // 2023-11-14 22:13:20 UTC
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    async fn make_store() -> IndexStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = IndexStore::from_pool(pool);
        store.init().await.unwrap();
        store
    }

    fn make_synchronizer(server: &MockServer, store: &IndexStore) -> Synchronizer {
        let client =
            GoogleClient::with_base_urls(&server.uri(), &server.uri(), "test-token").unwrap();
        Synchronizer::new(client, store.clone(), "root-1")
    }

    async fn mount_file_list(server: &MockServer, query: &str, files: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("q", query))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": files })))
            .mount(server)
            .await;
    }

    async fn mount_root_listing(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("pageSize", "100"))
            .and(wiremock::matchers::query_param_is_missing("q"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [ { "id": "root-1", "name": "logs" } ]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn missing_root_folder_aborts_the_rebuild() {
        let server = MockServer::start().await;
        let store = make_store().await;
        store
            .insert_folder(&FolderRecord {
                id: "stale".into(),
                name: "stale".into(),
                parent_id: "root-1".into(),
            })
            .await
            .unwrap();

        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [ { "id": "unrelated", "name": "other" } ]
            })))
            .mount(&server)
            .await;

        let err = make_synchronizer(&server, &store)
            .run(fixed_now())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::RootNotFound(_)));
        // The stale index is left untouched when the walk never started.
        assert!(store.find_folder_by_name("stale").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rebuild_indexes_current_month_fully_and_older_structurally() {
        let server = MockServer::start().await;
        let store = make_store().await;
        store
            .insert_folder(&FolderRecord {
                id: "stale".into(),
                name: "stale".into(),
                parent_id: "root-1".into(),
            })
            .await
            .unwrap();

        mount_root_listing(&server).await;
        mount_file_list(
            &server,
            "'root-1' in parents",
            json!([ { "id": "folder-1", "name": "auth" } ]),
        )
        .await;
        mount_file_list(
            &server,
            "'folder-1' in parents",
            json!([
                { "id": "ss-cur", "name": "2023-11" },
                { "id": "ss-old", "name": "2023-10" }
            ]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/ss-cur"))
            .and(query_param("includeGridData", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "spreadsheetId": "ss-cur",
                "sheets": [
                    {
                        "properties": { "sheetId": 0, "title": "login" },
                        "data": [ { "rowData": [ {}, {}, {} ] } ]
                    }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v4/spreadsheets/ss-cur:batchUpdate"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "spreadsheetId": "ss-cur" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/ss-old"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "spreadsheetId": "ss-old",
                "sheets": [
                    { "properties": { "sheetId": 4, "title": "logout" } }
                ]
            })))
            .mount(&server)
            .await;

        let summary = make_synchronizer(&server, &store)
            .run(fixed_now())
            .await
            .unwrap();

        assert_eq!(
            summary,
            SyncSummary {
                folders: 1,
                spreadsheets: 2
            }
        );
        assert!(store.find_folder_by_name("stale").await.unwrap().is_none());
        assert!(store.find_folder_by_name("auth").await.unwrap().is_some());

        let current = store.get_spreadsheet("ss-cur").await.unwrap().unwrap();
        assert_eq!(current.sheets[0].title, "login");
        assert_eq!(current.sheets[0].row_length, 2);

        let older = store.get_spreadsheet("ss-old").await.unwrap().unwrap();
        assert_eq!(older.sheets[0].title, "logout");
        assert_eq!(older.sheets[0].row_length, 0);
    }

    #[tokio::test]
    async fn one_failed_spreadsheet_does_not_stop_the_walk() {
        let server = MockServer::start().await;
        let store = make_store().await;

        mount_root_listing(&server).await;
        mount_file_list(
            &server,
            "'root-1' in parents",
            json!([ { "id": "folder-1", "name": "auth" } ]),
        )
        .await;
        mount_file_list(
            &server,
            "'folder-1' in parents",
            json!([
                { "id": "ss-bad", "name": "2023-09" },
                { "id": "ss-old", "name": "2023-10" }
            ]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/ss-bad"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/ss-old"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "spreadsheetId": "ss-old",
                "sheets": [ { "properties": { "sheetId": 4, "title": "logout" } } ]
            })))
            .mount(&server)
            .await;

        let summary = make_synchronizer(&server, &store)
            .run(fixed_now())
            .await
            .unwrap();

        assert_eq!(summary.folders, 1);
        assert_eq!(summary.spreadsheets, 1);
        assert!(store.get_spreadsheet("ss-bad").await.unwrap().is_none());
        assert!(store.get_spreadsheet("ss-old").await.unwrap().is_some());
    }
}
