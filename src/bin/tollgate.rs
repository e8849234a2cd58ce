//! Tollgate server binary.
//!
//! Main application entry point that wires storage, the authorization server
//! and the configured token verifier together, then serves HTTP with graceful
//! shutdown and hourly cleanup of expired tokens.

use anyhow::Result;
use std::{env, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tollgate::{
    config::{Config, VerifierMode},
    directory::{BcryptUserAuthenticator, StoreMembershipDirectory},
    errors::StorageError,
    http::{AppState, build_router},
    oauth::{
        AuthorizationServer, GrantSettings, IntrospectionVerifier, OrganizationExtensionSupplier,
        StoreTokenVerifier, TokenVerifier,
    },
    storage::{OAuthStorage, create_storage_backend, parse_storage_backend},
};
use tracing_subscriber::prelude::*;

/// Interval between expired-token sweeps
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tollgate=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().pretty())
        .init();

    let version = tollgate::config::version()?;

    env::args().for_each(|arg| {
        if arg == "--version" {
            println!("{version}");
            std::process::exit(0);
        }
    });

    tracing::info!(?version, "Starting tollgate");

    let config = Config::new()?;

    let storage_backend =
        parse_storage_backend(&config.storage_backend, config.database_url.as_deref())?;
    tracing::info!(backend = %config.storage_backend, "Using storage backend");
    let storage: Arc<dyn OAuthStorage> = create_storage_backend(storage_backend)
        .await
        .map_err(|e| {
            StorageError::DatabaseError(format!("Storage backend creation failed: {}", e))
        })?;

    if let Some(bootstrap) = &config.bootstrap_client {
        storage
            .set_client(&bootstrap.client_id, &bootstrap.to_client())
            .await?;
        tracing::info!(client_id = %bootstrap.client_id, "Bootstrap client registered");
    }

    let extension = OrganizationExtensionSupplier::new(
        Arc::new(StoreMembershipDirectory::new(storage.clone())),
        config.extension_failure_policy,
    );
    let auth_server = Arc::new(AuthorizationServer::new(
        storage.clone(),
        Arc::new(BcryptUserAuthenticator::new(storage.clone())),
        Arc::new(extension),
        GrantSettings::from(&config),
    ));

    let verifier: Arc<dyn TokenVerifier> = match &config.verifier_mode {
        VerifierMode::Local => Arc::new(StoreTokenVerifier::new(storage.clone())),
        VerifierMode::Introspection {
            url,
            client_id,
            client_secret,
            timeout,
        } => {
            tracing::info!(%url, "Verifying bearer tokens through introspection");
            Arc::new(IntrospectionVerifier::new(
                url.clone(),
                client_id.clone(),
                client_secret.clone(),
                *timeout.as_ref(),
                &config.user_agent,
            )?)
        }
    };

    let app_context = AppState {
        config: Arc::new(config.clone()),
        auth_server: auth_server.clone(),
        verifier,
    };

    // Build the router
    let app = build_router(app_context);

    // Setup graceful shutdown
    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    {
        let tracker = tracker.clone();
        let inner_token = token.clone();

        let ctrl_c = async {
            if let Err(err) = signal::ctrl_c().await {
                tracing::error!("failed to install Ctrl+C handler: {}", err);
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
                    tracing::error!("failed to install signal handler: {}", err);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::spawn(async move {
            tokio::select! {
                () = inner_token.cancelled() => { },
                _ = terminate => {},
                _ = ctrl_c => {},
            }

            tracker.close();
            inner_token.cancel();
        });
    }

    // Sweep expired tokens
    {
        let inner_token = token.clone();
        let auth_server = auth_server.clone();
        tracker.spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                tokio::select! {
                    () = inner_token.cancelled() => break,
                    _ = interval.tick() => {
                        match auth_server.cleanup_expired_tokens().await {
                            Ok(0) => {}
                            Ok(removed) => tracing::info!(removed, "Removed expired tokens"),
                            Err(err) => tracing::error!(error = ?err, "Token cleanup failed"),
                        }
                    }
                }
            }
        });
    }

    // Start HTTP server
    {
        let http_port = *config.http_port.as_ref();
        let inner_token = token.clone();
        tracker.spawn(async move {
            let bind_address = format!("0.0.0.0:{http_port}");
            tracing::info!("Starting server on {bind_address}");
            let listener = match TcpListener::bind(&bind_address).await {
                Ok(listener) => listener,
                Err(err) => {
                    tracing::error!("failed to bind {bind_address}: {}", err);
                    inner_token.cancel();
                    return;
                }
            };

            let shutdown_token = inner_token.clone();
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    tokio::select! {
                        () = shutdown_token.cancelled() => { }
                    }
                    tracing::info!("axum graceful shutdown complete");
                })
                .await;
            if let Err(err) = result {
                tracing::error!("axum task failed: {}", err);
            }

            inner_token.cancel();
        });
    }

    tracker.wait().await;

    Ok(())
}
