mod token_file;

pub use token_file::{CredentialsFile, InstalledCredentials, OAuthState, StorageError, TokenFile};
