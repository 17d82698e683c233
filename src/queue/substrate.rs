//! Connection and provisioning for the JetStream substrate.
//!
//! Both processes go through here on startup: the server provisions the
//! work-queue stream and the rate-limit bucket, the worker additionally
//! opens the cache buckets and its durable pull consumers.

use async_nats::jetstream;
use async_nats::jetstream::consumer::AckPolicy;
use async_nats::jetstream::{consumer, kv, stream};
use std::time::Duration;
use thiserror::Error;

use crate::settings::Settings;

/// A durable pull consumer for one work subject.
pub type SubjectConsumer = consumer::Consumer<consumer::pull::Config>;

#[derive(Debug, Error)]
pub enum SubstrateError {
    #[error("unable to connect to nats: {0}")]
    Connect(#[from] async_nats::ConnectError),

    #[error("unable to create stream: {0}")]
    CreateStream(#[from] jetstream::context::CreateStreamError),

    #[error("unable to create kv bucket `{bucket}': {source}")]
    CreateBucket {
        bucket: String,
        #[source]
        source: jetstream::context::CreateKeyValueError,
    },

    #[error("unable to create consumer `{durable}': {source}")]
    CreateConsumer {
        durable: String,
        #[source]
        source: stream::ConsumerError,
    },
}

/// An open connection to the substrate.
pub struct Substrate {
    pub jetstream: jetstream::Context,
}

impl Substrate {
    pub async fn connect(settings: &Settings) -> Result<Substrate, SubstrateError> {
        let client = async_nats::connect(&settings.nats_url).await?;
        Ok(Substrate {
            jetstream: jetstream::new(client),
        })
    }

    /// Creates or updates the work-queue stream covering all three subjects.
    pub async fn ensure_stream(
        &self,
        settings: &Settings,
    ) -> Result<stream::Stream, SubstrateError> {
        let config = stream::Config {
            name: settings.stream_name.clone(),
            subjects: vec![
                format!("{}.>", settings.push_subject).into(),
                format!("{}.>", settings.status_subject).into(),
                format!("{}.>", settings.pull_request_subject).into(),
            ],
            retention: stream::RetentionPolicy::WorkQueue,
            max_age: settings.max_message_age,
            ..Default::default()
        };
        Ok(self.jetstream.get_or_create_stream(config).await?)
    }

    /// Opens a KV bucket with the given TTL, creating it if needed.
    pub async fn bucket(&self, name: &str, ttl: Duration) -> Result<kv::Store, SubstrateError> {
        self.jetstream
            .create_key_value(kv::Config {
                bucket: name.to_string(),
                max_age: ttl,
                ..Default::default()
            })
            .await
            .map_err(|source| SubstrateError::CreateBucket {
                bucket: name.to_string(),
                source,
            })
    }

    /// Creates a durable pull consumer for one subject prefix.
    pub async fn consumer(
        &self,
        stream: &stream::Stream,
        durable: &str,
        subject_prefix: &str,
        max_deliver: i64,
    ) -> Result<SubjectConsumer, SubstrateError> {
        stream
            .create_consumer(consumer::pull::Config {
                durable_name: Some(durable.to_string()),
                ack_policy: AckPolicy::Explicit,
                max_deliver,
                filter_subject: format!("{subject_prefix}.>"),
                ..Default::default()
            })
            .await
            .map_err(|source| SubstrateError::CreateConsumer {
                durable: durable.to_string(),
                source,
            })
    }
}
