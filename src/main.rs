//! drive-vault server binary.
//!
//! Gives every authenticated user a private folder tree inside one shared
//! Google Drive account. The main entry point builds the storage provider,
//! the root resolver and the credential verifier, then serves the Axum
//! router over HTTP or HTTPS.

mod account;
mod app;
mod atomic;
mod auth;
mod background;
mod config;
mod drive;
mod error;
mod files;
mod health;
mod http;
mod locking;
mod logging;
mod tls;
mod upload;
mod vault;

use axum_server::Handle;
use clap::Parser;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

use crate::auth::{Authenticator, CredentialVerifier, JwtVerifier};
use crate::background::spawn_background_tasks;
use crate::config::{Args, Command, ProviderKind};
use crate::drive::{GoogleDrive, GoogleDriveConfig, MemoryDrive, StorageProvider};
use crate::http::build_cors_layer;
use crate::locking::IdentityLocks;
use crate::upload::UploadConfig;
use crate::vault::profile::{JsonFileProfileStore, MemoryProfileStore, ProfileStore};
use crate::vault::query::FolderId;
use crate::vault::resolver::RootResolver;
use crate::vault::{IsolationPolicy, Vault, VaultSettings};

fn invalid_input(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message.into())
}

async fn build_provider(args: &Args) -> io::Result<(Arc<dyn StorageProvider>, FolderId)> {
    match args.provider {
        ProviderKind::Google => {
            let master = args
                .master_folder_id
                .as_deref()
                .ok_or_else(|| invalid_input("MASTER_FOLDER_ID is required"))?;
            let master = FolderId::parse(master).map_err(|err| invalid_input(err.to_string()))?;
            let credentials = args.google_credentials().map_err(|missing| {
                invalid_input(format!("missing Google credentials: {}", missing.join(", ")))
            })?;
            let drive = GoogleDrive::new(GoogleDriveConfig {
                client_id: credentials.client_id,
                client_secret: credentials.client_secret,
                refresh_token: credentials.refresh_token,
            });
            Ok((Arc::new(drive), master))
        }
        ProviderKind::Memory => {
            warn!("using the in-memory provider, data is lost on restart");
            let drive = MemoryDrive::new();
            let master = drive.create_top_level_folder("master").await;
            let master = FolderId::parse(&master.id).map_err(|err| invalid_input(err.to_string()))?;
            Ok((Arc::new(drive), master))
        }
    }
}

fn build_authenticator(args: &Args) -> Authenticator {
    let verifier: Option<Arc<dyn CredentialVerifier>> = match args.isolation {
        IsolationPolicy::Header => {
            warn!("trusting the x-user-id header, run behind an authenticating proxy");
            None
        }
        IsolationPolicy::Token | IsolationPolicy::Shared => {
            let verifier = match args.auth_secret.as_deref() {
                Some(secret) => {
                    warn!("verifying tokens with a shared HS256 secret");
                    JwtVerifier::with_secret(secret)
                }
                None => JwtVerifier::with_jwks(args.auth_jwks_url.clone()),
            };
            let verifier = match args.auth_project_id.as_deref() {
                Some(project_id) => verifier.for_project(project_id),
                None => verifier,
            };
            let verifier: Arc<dyn CredentialVerifier> = Arc::new(verifier);
            Some(verifier)
        }
    };
    Authenticator {
        policy: args.isolation,
        verifier,
    }
}

fn build_profile_store(args: &Args) -> Arc<dyn ProfileStore> {
    match args.profile_store.as_deref() {
        Some(path) => Arc::new(JsonFileProfileStore::new(PathBuf::from(path))),
        None => Arc::new(MemoryProfileStore::new()),
    }
}

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let (provider, master) = build_provider(&args).await?;
    let locks = Arc::new(IdentityLocks::new());
    let resolver = RootResolver::new(
        provider.clone(),
        build_profile_store(&args),
        locks.clone(),
        master.clone(),
        args.root_name_prefix.clone(),
        Duration::from_secs(args.root_lock_timeout_secs),
    );

    if let Some(Command::InitUser { identity, email }) = &args.command {
        let folder_id = account::provision_user(&resolver, identity, email.as_deref())
            .await
            .map_err(|err| io::Error::other(err.to_string()))?;
        println!("{}", folder_id.as_str());
        return Ok(());
    }

    let vault = Arc::new(Vault::new(
        provider,
        resolver,
        VaultSettings {
            master: master.clone(),
            isolation: args.isolation,
        },
    ));
    let authenticator = Arc::new(build_authenticator(&args));
    let upload_config = Arc::new(UploadConfig {
        spool_dir: PathBuf::from(&args.spool_dir),
        max_file_size: args.upload_max_size,
        spool_ttl: Duration::from_secs(args.spool_ttl_secs),
    });
    tokio::fs::create_dir_all(&upload_config.spool_dir).await?;

    let app = app::build_router(
        vault,
        authenticator,
        upload_config.clone(),
        build_cors_layer(args.cors_origins.as_deref()),
    );

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| invalid_input(err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let tls_config = tls::build_rustls_config(&args).await?;
    let handle = Handle::new();

    info!(
        master = master.as_str(),
        isolation = ?args.isolation,
        provider = ?args.provider,
        "vault configured"
    );
    spawn_background_tasks(locks, upload_config);

    tokio::spawn(shutdown_signal(handle.clone()));
    let service = app.into_make_service_with_connect_info::<SocketAddr>();
    match tls_config {
        Some(tls_config) => {
            info!("🔒 Starting HTTPS server at {}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(service)
                .await
        }
        None => {
            info!("🚀 Starting HTTP server at {}", addr);
            axum_server::bind(addr).handle(handle).serve(service).await
        }
    }
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
