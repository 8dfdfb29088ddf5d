use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use sheetlog_core::{GoogleClient, GoogleOAuthClient};
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::http::{AppContext, IngestJob, router};
use crate::storage::{CredentialsFile, OAuthState, TokenFile};
use crate::sync::engine::ReconcileEngine;
use crate::sync::index::IndexStore;
use crate::sync::startup::{SyncError, Synchronizer};
use crate::token_provider::{TokenProvider, oauth_state_from_token};

const DEFAULT_CREDENTIALS_PATH: &str = "./credentials.json";
const DEFAULT_TOKEN_PATH: &str = "./token.json";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_SCOPES: &str = "https://www.googleapis.com/auth/drive.file,\
                              https://www.googleapis.com/auth/spreadsheets";
const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub root_folder_id: String,
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
    pub scopes: Vec<String>,
    pub bind_addr: SocketAddr,
    pub db_path: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let root_folder_id = std::env::var("SHEETLOG_ROOT_FOLDER_ID")
            .context("SHEETLOG_ROOT_FOLDER_ID is not set")?;
        let credentials_path = PathBuf::from(read_env_or(
            "SHEETLOG_CREDENTIALS_PATH",
            DEFAULT_CREDENTIALS_PATH,
        ));
        let token_path = PathBuf::from(read_env_or("SHEETLOG_TOKEN_PATH", DEFAULT_TOKEN_PATH));
        let scopes = split_scopes(&read_env_or("SHEETLOG_SCOPES", DEFAULT_SCOPES));
        let bind_addr = read_env_or("SHEETLOG_BIND_ADDR", DEFAULT_BIND_ADDR)
            .parse()
            .context("SHEETLOG_BIND_ADDR is not a valid socket address")?;
        let db_path = std::env::var("SHEETLOG_DB_PATH").ok().map(PathBuf::from);

        Ok(Self {
            root_folder_id,
            credentials_path,
            token_path,
            scopes,
            bind_addr,
            db_path,
        })
    }
}

fn read_env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn split_scopes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|scope| !scope.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    engine: Arc<ReconcileEngine>,
    jobs_tx: mpsc::UnboundedSender<IngestJob>,
    jobs_rx: mpsc::UnboundedReceiver<IngestJob>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        let credentials = CredentialsFile::load(&config.credentials_path).with_context(|| {
            format!(
                "failed to load credentials from {:?}",
                config.credentials_path
            )
        })?;
        let oauth_client = GoogleOAuthClient::new(
            credentials.installed.client_id.clone(),
            credentials.installed.client_secret.clone(),
        )?;
        let token_file = TokenFile::new(config.token_path.clone());

        let state = match token_file.load()? {
            Some(state) => state,
            None => {
                let state = run_consent_flow(&oauth_client, &credentials, &config.scopes).await?;
                token_file.save(&state)?;
                state
            }
        };

        let mut provider = TokenProvider::new(state, oauth_client, token_file);
        let access_token = provider
            .valid_access_token()
            .await
            .context("failed to obtain an access token")?;
        let client = GoogleClient::new(access_token)?;

        let index = match &config.db_path {
            Some(path) => IndexStore::new_at(path).await,
            None => IndexStore::new_default().await,
        }
        .context("failed to initialize the index store")?;

        let synchronizer = Synchronizer::new(
            client.clone(),
            index.clone(),
            config.root_folder_id.clone(),
        );
        match synchronizer.run(OffsetDateTime::now_utc()).await {
            Ok(summary) => eprintln!(
                "[sheetlogd] startup sync complete: {} folders, {} spreadsheets",
                summary.folders, summary.spreadsheets
            ),
            Err(err @ SyncError::RootNotFound { .. }) => {
                // The index stays empty; the engine rebuilds lazily per request.
                eprintln!("[sheetlogd] startup sync failed: {err}");
            }
            Err(err) => eprintln!("[sheetlogd] startup sync incomplete: {err}"),
        }

        let engine = Arc::new(ReconcileEngine::new(
            client,
            index,
            config.root_folder_id.clone(),
        ));
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            engine,
            jobs_tx,
            jobs_rx,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        eprintln!(
            "[sheetlogd] started: bind_addr={}, root_folder_id={}",
            self.config.bind_addr, self.config.root_folder_id
        );

        let engine = Arc::clone(&self.engine);
        let mut jobs_rx = self.jobs_rx;
        let dispatcher_handle = tokio::spawn(async move {
            while let Some(job) = jobs_rx.recv().await {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    let kind = job.entry.log_kind_name.clone();
                    let sub_kind = job.entry.sub_kind_name.clone();
                    if let Err(err) = engine.resolve_and_append(&job.entry, job.received_at).await {
                        eprintln!("[sheetlogd] append failed for {kind}/{sub_kind}: {err}");
                    }
                });
            }
        });

        let app = router(AppContext {
            jobs: self.jobs_tx.clone(),
        });
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.config.bind_addr))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    eprintln!("[sheetlogd] failed waiting for shutdown signal: {err}");
                }
            })
            .await
            .context("http server failed")?;

        dispatcher_handle.abort();
        Ok(())
    }
}

/// Terminal consent flow for the installed-app grant: print the consent
/// URL, read the authorization code from stdin, exchange it for a token.
async fn run_consent_flow(
    oauth_client: &GoogleOAuthClient,
    credentials: &CredentialsFile,
    scopes: &[String],
) -> anyhow::Result<OAuthState> {
    let redirect_uri = credentials
        .installed
        .redirect_uris
        .first()
        .map(String::as_str)
        .unwrap_or(OOB_REDIRECT_URI);
    let url = oauth_client.authorize_url(redirect_uri, scopes)?;

    println!("Open this URL in your browser:\n{url}");
    print!("Enter the authorization code: ");
    std::io::stdout().flush()?;
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    let code = input.trim();
    if code.is_empty() {
        anyhow::bail!("no authorization code entered");
    }

    let token = oauth_client.exchange_code(code, redirect_uri).await?;
    Ok(oauth_state_from_token(&token, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_env_or_falls_back_to_default() {
        assert_eq!(
            read_env_or("NO_SUCH_ENV_FOR_TEST", "./fallback.json"),
            "./fallback.json"
        );
    }

    #[test]
    fn split_scopes_handles_whitespace_and_empty_entries() {
        let scopes = split_scopes(
            "https://www.googleapis.com/auth/drive.file, \
             https://www.googleapis.com/auth/spreadsheets,",
        );
        assert_eq!(
            scopes,
            vec![
                "https://www.googleapis.com/auth/drive.file".to_string(),
                "https://www.googleapis.com/auth/spreadsheets".to_string(),
            ]
        );
    }

    #[test]
    fn default_scopes_cover_drive_and_sheets() {
        let scopes = split_scopes(DEFAULT_SCOPES);
        assert_eq!(scopes.len(), 2);
        assert!(scopes[0].ends_with("drive.file"));
        assert!(scopes[1].ends_with("spreadsheets"));
    }

    #[test]
    fn default_bind_addr_parses() {
        let addr: SocketAddr = DEFAULT_BIND_ADDR.parse().unwrap();
        assert_eq!(addr.port(), 3000);
    }
}
