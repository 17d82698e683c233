//! Queue consumer process.
//!
//! Opens the KV buckets and the three durable subscriptions, then
//! reconciles work items until interrupted.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use merge_pilot::github::GithubClient;
use merge_pilot::queue::{RateLimitedPublisher, Subjects, Substrate, WorkQueue};
use merge_pilot::settings::Settings;
use merge_pilot::worker::{
    AccessTokens, CheckRuns, Policies, SubjectConsumers, Worker, WorkerParts,
};

#[tokio::main]
async fn main() {
    let settings = Settings::from_env().expect("invalid settings");
    init_tracing(&settings);

    let (app_id, private_key) =
        Settings::github_app_from_env().expect("invalid github app credentials");

    let substrate = Substrate::connect(&settings)
        .await
        .expect("unable to connect to nats");
    let stream = substrate
        .ensure_stream(&settings)
        .await
        .expect("unable to create stream");

    let rate_limit = substrate
        .bucket(&settings.rate_limit_bucket_name, settings.rate_limit_bucket_ttl)
        .await
        .expect("unable to create rate-limit bucket");
    let access_tokens = substrate
        .bucket(&settings.access_tokens_bucket_name, settings.access_tokens_bucket_ttl)
        .await
        .expect("unable to create access-tokens bucket");
    let configs = substrate
        .bucket(&settings.configs_bucket_name, settings.configs_bucket_ttl)
        .await
        .expect("unable to create configs bucket");
    let check_runs = substrate
        .bucket(&settings.check_runs_bucket_name, settings.check_runs_bucket_ttl)
        .await
        .expect("unable to create check-runs bucket");

    let consumers = SubjectConsumers {
        push: substrate
            .consumer(&stream, "push-worker", &settings.push_subject, settings.message_retry_attempts)
            .await
            .expect("unable to create push consumer"),
        status: substrate
            .consumer(&stream, "status-worker", &settings.status_subject, settings.message_retry_attempts)
            .await
            .expect("unable to create status consumer"),
        pull_request: substrate
            .consumer(
                &stream,
                "pull-request-worker",
                &settings.pull_request_subject,
                settings.message_retry_attempts,
            )
            .await
            .expect("unable to create pull_request consumer"),
    };

    let github = GithubClient::new(app_id, private_key).expect("unable to build github client");
    let publisher = RateLimitedPublisher::new(
        substrate.jetstream.clone(),
        rate_limit,
        settings.rate_limit_interval,
    );
    let queue = WorkQueue::new(Arc::new(publisher), Subjects::from_settings(&settings));

    let worker = Worker::new(WorkerParts {
        github,
        queue,
        tokens: AccessTokens::new(access_tokens),
        policies: Policies::new(configs),
        check_runs: CheckRuns::new(check_runs, settings.bot_name.clone()),
        allowed_repositories: settings.allowed_repositories.clone(),
        allow_only_public_repositories: settings.allow_only_public_repositories,
        retry_wait: settings.message_retry_wait,
        duration_to_wait_after_update_branch: settings.duration_to_wait_after_update_branch,
        message_channel_size: settings.message_channel_size_per_subject,
    });

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
            shutdown.cancel();
        });
    }

    if let Err(err) = worker.consume(consumers, shutdown).await {
        tracing::error!(error = %err, "unable to consume");
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
