use anyhow::Result;
use axum::{
    Router, middleware,
    routing::get,
};
use axum_server::{Handle, tls_rustls::RustlsConfig};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use super::{handlers, state::AppState};
use crate::auth::require_api_key;
use crate::config::ServerConfig;

/// How long in-flight requests get to finish once shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub fn build_router(state: Arc<AppState>) -> Router {
    // Product routes sit behind the API key check; health does not
    let products = Router::new()
        .route(
            "/products",
            get(handlers::list_products).post(handlers::create_product),
        )
        .route(
            "/products/:product_id",
            get(handlers::get_product)
                .put(handlers::put_product)
                .patch(handlers::patch_product)
                .delete(handlers::delete_product),
        )
        .route_layer(middleware::from_fn_with_state(
            state.authenticator.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(handlers::health_check))
        .merge(products)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub async fn start_server(state: Arc<AppState>, config: &ServerConfig) -> Result<()> {
    let app = build_router(state);
    let addr = config.socket_addr()?;

    if let Some((cert, key)) = config.tls_paths() {
        let tls = RustlsConfig::from_pem_file(cert, key).await?;

        let handle = Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        });

        info!("Server listening on https://{}", addr);
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    } else {
        warn!("Running without TLS");
        let listener = TcpListener::bind(addr).await?;
        serve(listener, app, shutdown_signal()).await?;
    }

    Ok(())
}

/// Serve `app` on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
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
