//! Webhook ingress process.
//!
//! Provisions the work-queue stream and the rate-limit bucket, then serves
//! webhook deliveries until interrupted. Connections are accepted by hand
//! so the per-phase timeouts can be configured on each one.

use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use tower_http::timeout::TimeoutLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use merge_pilot::ingress::{AppState, build_router};
use merge_pilot::queue::{RateLimitedPublisher, Subjects, Substrate, WorkQueue};
use merge_pilot::settings::Settings;

/// Bounds one request's processing end to end, standing in for socket
/// read and write timeouts (hyper exposes no per-direction knobs).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// How long a client may take to transmit a request's headers. hyper arms
/// the same timer while a keep-alive connection waits for its next
/// request, so this bound also closes idle connections.
const READ_HEADER_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    let settings = Settings::from_env().expect("invalid settings");
    init_tracing(&settings);

    let substrate = Substrate::connect(&settings)
        .await
        .expect("unable to connect to nats");
    substrate
        .ensure_stream(&settings)
        .await
        .expect("unable to create stream");
    let rate_limit = substrate
        .bucket(&settings.rate_limit_bucket_name, settings.rate_limit_bucket_ttl)
        .await
        .expect("unable to create rate-limit bucket");

    let publisher = RateLimitedPublisher::new(
        substrate.jetstream.clone(),
        rate_limit,
        settings.rate_limit_interval,
    );
    let queue = WorkQueue::new(Arc::new(publisher), Subjects::from_settings(&settings));
    let state = AppState::new(
        queue,
        settings.allowed_repositories.clone(),
        settings.allow_only_public_repositories,
    );

    let app = build_router(state).layer(TimeoutLayer::new(REQUEST_TIMEOUT));

    let listener = tokio::net::TcpListener::bind(&settings.address)
        .await
        .expect("unable to bind address");
    tracing::info!(address = %settings.address, "listening");

    loop {
        let stream = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(err) => {
                    tracing::warn!(error = %err, "unable to accept connection");
                    continue;
                }
            },
        };

        let service = TowerToHyperService::new(app.clone());
        tokio::spawn(async move {
            let mut builder = http1::Builder::new();
            builder.timer(TokioTimer::new());
            builder.header_read_timeout(READ_HEADER_TIMEOUT);
            if let Err(err) = builder
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!(error = %err, "connection closed with error");
            }
        });
    }
}

fn init_tracing(settings: &Settings) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.log_directive().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
