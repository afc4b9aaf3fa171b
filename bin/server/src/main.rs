use clap::Parser;
use portcullis_access::UserFilter;
use portcullis_config_source::{ConfigMapSource, ConfigSource, FileSource};
use portcullis_core::Result;
use portcullis_identity::OidcAuthenticator;
use portcullis_server::app::{AppState, router};
use portcullis_server::config::{Cli, GatewayConfig, ServerConfig, UsersLocation};
use portcullis_server::error::StartupError;
use portcullis_server::telemetry;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Exit status for any failure before or while serving.
const FATAL: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return ExitCode::from(FATAL);
        }
    };
    if let Err(e) = telemetry::init(&config.log_level, config.log_format) {
        eprintln!("ERROR: {e}");
        return ExitCode::from(FATAL);
    }

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Fatal error");
            eprintln!("ERROR: {e}");
            ExitCode::from(FATAL)
        }
    }
}

async fn run(config: &ServerConfig) -> Result<(), StartupError> {
    let gateway = config.validate().map_err(|e| StartupError::Config {
        details: e.to_string(),
    })?;
    info!(
        target_url = %gateway.target_url,
        passthroughs = ?gateway.passthroughs,
        "Gateway configured"
    );
    info!(
        idle_timeout_seconds = gateway.session.idle_timeout_seconds,
        lifetime_seconds = gateway.session.lifetime_seconds,
        "Session will expire after idle timeout or lifetime"
    );
    info!(scopes = %gateway.oidc.scopes().join(", "), "Requesting scopes");

    info!(issuer = %gateway.oidc.issuer_url(), "Discovering OIDC provider...");
    let authenticator = OidcAuthenticator::discover(gateway.oidc.clone())
        .await
        .map_err(|e| StartupError::Identity {
            details: e.to_string(),
        })?;

    let filter = user_filter(&gateway).await?;
    let state = Arc::new(AppState::new(authenticator, filter, &gateway)?);

    let cleanup_state = state.clone();
    let cleanup_interval = gateway.session.cleanup_interval();
    let cleanup = tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);
        loop {
            interval.tick().await;
            let count = cleanup_state.sessions.delete_expired().await;
            if count > 0 {
                debug!(deleted_sessions = count, "Periodic session cleanup");
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(&gateway.bind_addr)
        .await
        .map_err(|e| StartupError::Bind {
            addr: gateway.bind_addr.clone(),
            details: e.to_string(),
        })?;
    info!("listening on http://{}", gateway.bind_addr);

    let served = axum::serve(
        listener,
        router(state.clone()).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    cleanup.abort();
    state.filter.close();
    served.map_err(|e| StartupError::Serve {
        details: e.to_string(),
    })?;
    info!("Shut down");
    Ok(())
}

async fn user_filter(gateway: &GatewayConfig) -> Result<UserFilter, StartupError> {
    let source: Arc<dyn ConfigSource> = match &gateway.users {
        UsersLocation::File(path) => Arc::new(FileSource::new(path.clone())),
        UsersLocation::ConfigMap {
            namespace,
            name,
            key,
        } => {
            let source = ConfigMapSource::connect(namespace.as_deref(), name, key)
                .await
                .map_err(|e| StartupError::Users {
                    name: format!("configmap {name}/{key}"),
                    details: e.to_string(),
                })?;
            Arc::new(source)
        }
    };

    let name = source.name().to_string();
    let filter = UserFilter::new(source)
        .await
        .map_err(|e| StartupError::Users {
            name,
            details: e.to_string(),
        })?;
    info!(
        source = %filter.source_name(),
        entries = filter.snapshot().len(),
        "Watching users configuration"
    );
    Ok(filter)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Unable to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}
