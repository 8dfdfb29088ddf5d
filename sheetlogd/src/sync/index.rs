use std::{fs, path::PathBuf};

use sqlx::{Row, SqlitePool, sqlite::SqliteConnectOptions};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
}

/// One top-level log-kind category, backed by a remote folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRecord {
    pub id: String,
    pub name: String,
    pub parent_id: String,
}

/// One sub-kind tab inside a month spreadsheet. `row_length` is only set
/// when the sheet is created or indexed, never incremented per append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRecord {
    pub sheet_id: i64,
    pub title: String,
    pub row_length: i64,
}

/// One calendar month's spreadsheet within a category folder, with its
/// embedded sheet descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpreadsheetRecord {
    pub id: String,
    pub name: String,
    pub folder_id: String,
    pub sheets: Vec<SheetRecord>,
}

#[derive(Clone)]
pub struct IndexStore {
    pool: SqlitePool,
}

impl IndexStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new(database_url: &str) -> Result<Self, IndexError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn new_default() -> Result<Self, IndexError> {
        let db_path = default_db_path()?;
        Self::new_at(&db_path).await
    }

    pub async fn new_at(db_path: &PathBuf) -> Result<Self, IndexError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), IndexError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS folders (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                parent_id TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS spreadsheets (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                folder_id TEXT NOT NULL,
                FOREIGN KEY(folder_id) REFERENCES folders(id)
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sheets (
                spreadsheet_id TEXT NOT NULL,
                sheet_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                row_length INTEGER NOT NULL,
                PRIMARY KEY(spreadsheet_id, sheet_id),
                FOREIGN KEY(spreadsheet_id) REFERENCES spreadsheets(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drops every cached record. The startup synchronizer rebuilds the
    /// index from the remote hierarchy after calling this.
    pub async fn clear(&self) -> Result<(), IndexError> {
        sqlx::query("DELETE FROM sheets").execute(&self.pool).await?;
        sqlx::query("DELETE FROM spreadsheets")
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM folders")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_folder(&self, folder: &FolderRecord) -> Result<(), IndexError> {
        sqlx::query(
            "INSERT INTO folders (id, name, parent_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                parent_id = excluded.parent_id",
        )
        .bind(&folder.id)
        .bind(&folder.name)
        .bind(&folder.parent_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// First folder whose name matches, in insertion order. Duplicates can
    /// exist when concurrent requests raced; the first one wins.
    pub async fn find_folder_by_name(
        &self,
        name: &str,
    ) -> Result<Option<FolderRecord>, IndexError> {
        let row = sqlx::query(
            "SELECT id, name, parent_id FROM folders WHERE name = ?1 ORDER BY rowid ASC LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(FolderRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            parent_id: row.try_get("parent_id")?,
        }))
    }

    pub async fn upsert_spreadsheet(
        &self,
        spreadsheet: &SpreadsheetRecord,
    ) -> Result<(), IndexError> {
        sqlx::query(
            "INSERT INTO spreadsheets (id, name, folder_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                folder_id = excluded.folder_id",
        )
        .bind(&spreadsheet.id)
        .bind(&spreadsheet.name)
        .bind(&spreadsheet.folder_id)
        .execute(&self.pool)
        .await?;

        sqlx::query("DELETE FROM sheets WHERE spreadsheet_id = ?1")
            .bind(&spreadsheet.id)
            .execute(&self.pool)
            .await?;
        for sheet in &spreadsheet.sheets {
            self.add_sheet_descriptor(&spreadsheet.id, sheet).await?;
        }
        Ok(())
    }

    pub async fn get_spreadsheet(
        &self,
        id: &str,
    ) -> Result<Option<SpreadsheetRecord>, IndexError> {
        let row = sqlx::query("SELECT id, name, folder_id FROM spreadsheets WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut record = SpreadsheetRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            folder_id: row.try_get("folder_id")?,
            sheets: Vec::new(),
        };
        record.sheets = self.list_sheets(&record.id).await?;
        Ok(Some(record))
    }

    /// All spreadsheets under one folder, each with its sheet descriptors,
    /// in insertion order.
    pub async fn list_spreadsheets_by_folder(
        &self,
        folder_id: &str,
    ) -> Result<Vec<SpreadsheetRecord>, IndexError> {
        let rows = sqlx::query(
            "SELECT id, name, folder_id FROM spreadsheets WHERE folder_id = ?1 ORDER BY rowid ASC",
        )
        .bind(folder_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut record = SpreadsheetRecord {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                folder_id: row.try_get("folder_id")?,
                sheets: Vec::new(),
            };
            record.sheets = self.list_sheets(&record.id).await?;
            out.push(record);
        }
        Ok(out)
    }

    pub async fn find_sheet(
        &self,
        spreadsheet_id: &str,
        title: &str,
    ) -> Result<Option<SheetRecord>, IndexError> {
        let row = sqlx::query(
            "SELECT sheet_id, title, row_length FROM sheets
             WHERE spreadsheet_id = ?1 AND title = ?2
             ORDER BY rowid ASC LIMIT 1",
        )
        .bind(spreadsheet_id)
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(SheetRecord {
            sheet_id: row.try_get("sheet_id")?,
            title: row.try_get("title")?,
            row_length: row.try_get("row_length")?,
        }))
    }

    pub async fn add_sheet_descriptor(
        &self,
        spreadsheet_id: &str,
        sheet: &SheetRecord,
    ) -> Result<(), IndexError> {
        sqlx::query(
            "INSERT INTO sheets (spreadsheet_id, sheet_id, title, row_length)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(spreadsheet_id, sheet_id) DO UPDATE SET
                title = excluded.title,
                row_length = excluded.row_length",
        )
        .bind(spreadsheet_id)
        .bind(sheet.sheet_id)
        .bind(&sheet.title)
        .bind(sheet.row_length)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_sheets(&self, spreadsheet_id: &str) -> Result<Vec<SheetRecord>, IndexError> {
        let rows = sqlx::query(
            "SELECT sheet_id, title, row_length FROM sheets
             WHERE spreadsheet_id = ?1 ORDER BY rowid ASC",
        )
        .bind(spreadsheet_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(SheetRecord {
                sheet_id: row.try_get("sheet_id")?,
                title: row.try_get("title")?,
                row_length: row.try_get("row_length")?,
            });
        }
        Ok(out)
    }
}

fn default_db_path() -> Result<PathBuf, IndexError> {
    let mut path = dirs::data_dir().ok_or(IndexError::MissingDataDir)?;
    path.push("sheetlog");
    path.push("index.db");
    Ok(path)
}
