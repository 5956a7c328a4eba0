//! CLI arguments and server configuration defaults.

use clap::{Parser, Subcommand, ValueEnum};

use crate::vault::IsolationPolicy;

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_ROOT_NAME_PREFIX: &str = "vault_";
pub const DEFAULT_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";
pub const DEFAULT_SPOOL_DIR: &str = ".vault/spool";
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_SPOOL_TTL_SECS: u64 = 60 * 60;
pub const DEFAULT_ROOT_LOCK_TIMEOUT_SECS: u64 = 30;
pub const SPOOL_CLEAN_INTERVAL_SECS: u64 = 900;
pub const LOCK_PRUNE_INTERVAL_SECS: u64 = 300;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    /// Google Drive v3 via OAuth refresh token.
    Google,
    /// In-process store for local development.
    Memory,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create (or look up) a user's root folder and exit.
    InitUser {
        /// Verified identity (token subject or x-user-id value).
        identity: String,
        #[arg(long, help = "Email recorded in the profile store")]
        email: Option<String>,
    },
}

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "drive-vault", version, about = "Per-user folders on a shared Drive account")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,
    #[arg(
        short = 'b',
        long,
        env = "VAULT_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "PORT",
        default_value_t = DEFAULT_PORT,
        help = "Listen port"
    )]
    pub port: u16,
    #[arg(short = 'c', long, env = "VAULT_TLS_CERT", help = "TLS cert path")]
    pub tls_cert: Option<String>,
    #[arg(short = 'k', long, env = "VAULT_TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(long, env = "VAULT_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        value_enum,
        env = "VAULT_PROVIDER",
        default_value = "google",
        help = "Storage provider backend"
    )]
    pub provider: ProviderKind,
    #[arg(
        long,
        env = "MASTER_FOLDER_ID",
        help = "Shared folder holding every user's root folder"
    )]
    pub master_folder_id: Option<String>,
    #[arg(long, env = "GOOGLE_CLIENT_ID", help = "OAuth client id")]
    pub google_client_id: Option<String>,
    #[arg(long, env = "GOOGLE_CLIENT_SECRET", help = "OAuth client secret")]
    pub google_client_secret: Option<String>,
    #[arg(long, env = "GOOGLE_REFRESH_TOKEN", help = "OAuth refresh token")]
    pub google_refresh_token: Option<String>,
    #[arg(
        long,
        value_enum,
        env = "VAULT_ISOLATION",
        default_value = "token",
        help = "How callers are identified and isolated"
    )]
    pub isolation: IsolationPolicy,
    #[arg(
        long,
        env = "VAULT_AUTH_JWKS_URL",
        default_value = DEFAULT_JWKS_URL,
        help = "JWKS endpoint for ID token signatures"
    )]
    pub auth_jwks_url: String,
    #[arg(
        long,
        env = "VAULT_AUTH_PROJECT_ID",
        help = "Project id expected as token audience"
    )]
    pub auth_project_id: Option<String>,
    #[arg(
        long,
        env = "VAULT_AUTH_SECRET",
        help = "HS256 shared secret (development only, replaces JWKS)"
    )]
    pub auth_secret: Option<String>,
    #[arg(
        long,
        env = "VAULT_ROOT_NAME_PREFIX",
        default_value = DEFAULT_ROOT_NAME_PREFIX,
        help = "Prefix of per-user root folder names"
    )]
    pub root_name_prefix: String,
    #[arg(
        long,
        env = "VAULT_PROFILE_STORE",
        help = "JSON file caching identity to root folder mappings"
    )]
    pub profile_store: Option<String>,
    #[arg(
        long,
        env = "VAULT_SPOOL_DIR",
        default_value = DEFAULT_SPOOL_DIR,
        help = "Temporary directory for incoming uploads"
    )]
    pub spool_dir: String,
    #[arg(
        long,
        env = "VAULT_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max size per uploaded file in bytes (0 to disable)"
    )]
    pub upload_max_size: u64,
    #[arg(
        long,
        env = "VAULT_SPOOL_TTL_SECS",
        default_value_t = DEFAULT_SPOOL_TTL_SECS,
        help = "Age after which leftover spool files are removed (0 to disable)"
    )]
    pub spool_ttl_secs: u64,
    #[arg(
        long,
        env = "VAULT_ROOT_LOCK_TIMEOUT_SECS",
        default_value_t = DEFAULT_ROOT_LOCK_TIMEOUT_SECS,
        help = "Max wait for a concurrent root folder resolution"
    )]
    pub root_lock_timeout_secs: u64,
}

/// OAuth values required by the Google backend.
pub struct GoogleCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl Args {
    /// Returns the missing variable names when any credential is absent.
    pub fn google_credentials(&self) -> Result<GoogleCredentials, Vec<&'static str>> {
        let fields = [
            ("GOOGLE_CLIENT_ID", &self.google_client_id),
            ("GOOGLE_CLIENT_SECRET", &self.google_client_secret),
            ("GOOGLE_REFRESH_TOKEN", &self.google_refresh_token),
        ];
        let missing: Vec<&'static str> = fields
            .iter()
            .filter(|(_, value)| value.as_deref().is_none_or(str::is_empty))
            .map(|(name, _)| *name)
            .collect();
        match (
            &self.google_client_id,
            &self.google_client_secret,
            &self.google_refresh_token,
        ) {
            (Some(client_id), Some(client_secret), Some(refresh_token)) if missing.is_empty() => {
                Ok(GoogleCredentials {
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                    refresh_token: refresh_token.clone(),
                })
            }
            _ => Err(missing),
        }
    }
}
