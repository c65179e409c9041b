// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;
use std::time::Duration;

use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::consumer::{AckPolicy, Consumer};
use async_nats::jetstream::stream::{Config as StreamConfig, RetentionPolicy};
use async_nats::jetstream::Context;
use futures_util::StreamExt;
use uuid::Uuid;

const STREAM_NAME: &str = "BEACH_ACTIONS";
const SUBJECT_WILDCARD: &str = "beach.>";

#[derive(Debug)]
pub enum BrokerError {
    Unavailable(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "broker unavailable: {msg}"),
        }
    }
}

impl std::error::Error for BrokerError {}

/// One entry pulled off a session's consumer: the durable sequence number
/// (used to delete the entry once acked) plus the serialized action payload.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub sequence: u64,
    pub payload: Vec<u8>,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
}

/// The brokered per-session action stream (spec §3 "Queue entry", §4.3).
pub struct BrokerStream {
    jetstream: Context,
    visibility_timeout: Duration,
    replay_retention: Duration,
}

impl BrokerStream {
    pub fn new(client: async_nats::Client, visibility_timeout: Duration, replay_retention: Duration) -> Self {
        Self { jetstream: async_nats::jetstream::new(client), visibility_timeout, replay_retention }
    }

    /// Create the shared stream if it does not already exist. `WorkQueue`
    /// retention deletes a message as soon as its sole consumer acks it;
    /// `max_age` bounds how long a never-acked entry (a permanently
    /// disconnected host) can linger, resolving the "retention horizon"
    /// open question per `BROKER_REPLAY_RETENTION` (spec §9, SPEC_FULL §4.3).
    pub async fn ensure_stream(&self) -> Result<(), BrokerError> {
        self.jetstream
            .get_or_create_stream(StreamConfig {
                name: STREAM_NAME.to_owned(),
                subjects: vec![SUBJECT_WILDCARD.to_owned()],
                retention: RetentionPolicy::WorkQueue,
                max_age: self.replay_retention,
                ..Default::default()
            })
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(())
    }

    fn subject(private_beach_id: &str, session_id: Uuid) -> String {
        format!("beach.{private_beach_id}.session.{session_id}.actions")
    }

    /// Append one action to the session's subject. Returns the stream
    /// sequence, which callers use as the ack/delete handle.
    pub async fn append(
        &self,
        private_beach_id: &str,
        session_id: Uuid,
        payload: &[u8],
    ) -> Result<u64, BrokerError> {
        let subject = Self::subject(private_beach_id, session_id);
        let ack = self
            .jetstream
            .publish(subject, payload.to_vec().into())
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(ack.sequence)
    }

    /// Append a batch in the order supplied, awaiting each publish ack
    /// before the next so ordering is preserved end to end (spec §4.3, §5).
    pub async fn append_batch(
        &self,
        private_beach_id: &str,
        session_id: Uuid,
        payloads: &[Vec<u8>],
    ) -> Result<Vec<u64>, BrokerError> {
        let mut sequences = Vec::with_capacity(payloads.len());
        for payload in payloads {
            sequences.push(self.append(private_beach_id, session_id, payload).await?);
        }
        Ok(sequences)
    }

    /// Get or create this session's durable pull consumer. One consumer per
    /// session gives each session its own consumer-group cursor (spec §3).
    async fn consumer(
        &self,
        private_beach_id: &str,
        session_id: Uuid,
    ) -> Result<Consumer<PullConfig>, BrokerError> {
        let stream = self
            .jetstream
            .get_stream(STREAM_NAME)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        let durable_name = session_id.to_string();
        let config = PullConfig {
            durable_name: Some(durable_name.clone()),
            filter_subject: Self::subject(private_beach_id, session_id),
            ack_policy: AckPolicy::Explicit,
            ack_wait: self.visibility_timeout,
            ..Default::default()
        };

        stream
            .get_or_create_consumer(&durable_name, config)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))
    }

    /// Pull up to `max` pending entries for a host's HTTP fallback poll or
    /// for replay after a fast-path outage.
    pub async fn poll(
        &self,
        private_beach_id: &str,
        session_id: Uuid,
        max: usize,
    ) -> Result<Vec<PendingEntry>, BrokerError> {
        let consumer = self.consumer(private_beach_id, session_id).await?;

        let mut messages = consumer
            .fetch()
            .max_messages(max)
            .expires(Duration::from_millis(250))
            .messages()
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        let mut entries = Vec::new();
        while let Some(next) = messages.next().await {
            let msg = match next {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::debug!(err = %e, "broker fetch message error");
                    continue;
                }
            };
            let info = msg.info().map_err(|e| BrokerError::Unavailable(e.to_string()))?;
            entries.push(PendingEntry {
                sequence: info.stream_sequence,
                payload: msg.payload.to_vec(),
                enqueued_at: chrono::Utc::now(),
            });
            // Deliberately not acked here: an entry stays pending until the
            // Action Pipeline observes a real ack from the host and deletes
            // it by sequence (`Self::delete`). If the host never applies it,
            // JetStream redelivers after `ack_wait` — that is the reclaim
            // mechanism spec §4.3 calls for, not a separate sweeper loop.
        }
        Ok(entries)
    }

    /// Remove an acked entry from the stream by sequence number. Idempotent:
    /// deleting an already-deleted sequence is treated as success.
    pub async fn delete(&self, session_id: Uuid, sequence: u64) -> Result<(), BrokerError> {
        let stream = self
            .jetstream
            .get_stream(STREAM_NAME)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        match stream.delete_message(sequence).await {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("no message found") => {
                tracing::trace!(session_id = %session_id, sequence, "broker entry already removed");
                Ok(())
            }
            Err(e) => Err(BrokerError::Unavailable(e.to_string())),
        }
    }

    /// Pending depth for backpressure (spec §4.3: reject above 500, resume
    /// below 400) and the `/actions/pending` endpoint.
    pub async fn depth(&self, private_beach_id: &str, session_id: Uuid) -> Result<u64, BrokerError> {
        let mut consumer = self.consumer(private_beach_id, session_id).await?;
        let info = consumer.info().await.map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(info.num_pending)
    }

    /// Cheap connectivity probe for `/readyz`: confirms the shared stream is
    /// still reachable without pulling or publishing anything.
    pub async fn health_check(&self) -> Result<(), BrokerError> {
        self.jetstream
            .get_stream(STREAM_NAME)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(())
    }
}
