//! API server initialization

use std::net::SocketAddr;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;

use super::middleware::{self, AllowedOrigins};
use super::routes;
use crate::core::CoreApp;
use crate::core::constants::DEFAULT_BODY_LIMIT;

pub struct ApiServer {
    app: CoreApp,
    allowed_origins: AllowedOrigins,
}

impl ApiServer {
    pub fn new(app: CoreApp) -> Self {
        let addr: SocketAddr = app.config.server.bind_address.parse().expect("bind_address must be a valid socket address");
        let allowed_origins = AllowedOrigins::new(&addr.ip().to_string(), addr.port());
        Self { app, allowed_origins }
    }

    /// Returns `CoreApp` so the caller can drive shutdown afterward.
    pub async fn start(self) -> Result<CoreApp> {
        let Self { app, allowed_origins } = self;

        let shutdown = app.shutdown.clone();
        let addr: SocketAddr = app.config.server.bind_address.parse()?;

        let router = routes::routes(
            app.correlator.clone(),
            app.cache.clone(),
            app.scheduler.clone(),
            app.store.clone(),
            app.notifier.clone(),
            app.realtime.clone(),
            app.config.s3.clone(),
        )
        .fallback(middleware::handle_404)
        .layer(CompressionLayer::new())
        .layer(middleware::cors(&allowed_origins))
        .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT));

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_address_parses_to_socket_addr() {
        let addr: SocketAddr = "0.0.0.0:8080".parse().unwrap();
        assert_eq!(addr.port(), 8080);
    }
}
