//! Kafka consumer loop for the events topic.
//!
//! One loop owns the subscription; messages are processed sequentially,
//! which together with the producer's `tenantId|streamKey` partition key is
//! what preserves per-stream ordering. Offsets are committed manually and
//! only after the pipeline reaches a terminal outcome, so a crash mid-message
//! replays it and the store's dedup barrier collapses it into a duplicate.

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn, Instrument};

use event_store::PersistStore;

use crate::config::KafkaConfig;
use crate::error::Result;
use crate::fanout::FanoutSink;
use crate::metrics;
use crate::pipeline::Pipeline;

/// Bound on a single poll so shutdown stays responsive.
const POLL_WAIT: Duration = Duration::from_secs(1);

/// Events consumer. Owns the subscription; not shared across tasks.
pub struct EventsConsumer<S, F> {
    consumer: StreamConsumer,
    pipeline: Pipeline<S, F>,
}

impl<S: PersistStore, F: FanoutSink> EventsConsumer<S, F> {
    /// Create the consumer and subscribe to the events topic.
    pub fn new(config: &KafkaConfig, pipeline: Pipeline<S, F>) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &config.group_id)
            .set("bootstrap.servers", &config.brokers)
            .set("enable.auto.commit", "false") // Commit is the terminal per-message step
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000")
            .set("enable.partition.eof", "false")
            .create()?;

        consumer.subscribe(&[&config.topic])?;

        info!(
            topic = %config.topic,
            group_id = %config.group_id,
            "Events consumer subscribed"
        );

        Ok(Self { consumer, pipeline })
    }

    /// Run the consumer loop until the shutdown signal fires. The current
    /// message always reaches its terminal transition before the loop exits.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!("Starting events consumer loop");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signal received; stopping consumer loop");
                    break;
                }
                polled = tokio::time::timeout(POLL_WAIT, self.consumer.recv()) => {
                    match polled {
                        // Bounded wait elapsed; loop around and re-check shutdown.
                        Err(_) => continue,
                        Ok(Err(e)) => {
                            error!("Kafka consumer error: {}", e);
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                        Ok(Ok(msg)) => self.handle_message(&msg).await,
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_message(&self, msg: &BorrowedMessage<'_>) {
        let trace = trace_context::extract_from_message(msg);
        let (trace_id, parent_span_id) = trace
            .as_ref()
            .map(|ctx| (ctx.trace_id.clone(), ctx.span_id.clone()))
            .unwrap_or_default();

        let span = tracing::info_span!(
            "process_record",
            topic = msg.topic(),
            partition = msg.partition(),
            offset = msg.offset(),
            trace_id = %trace_id,
            parent_span_id = %parent_span_id,
        );

        let payload = msg.payload().unwrap_or_default();
        let outcome = self.pipeline.process(payload).instrument(span).await;

        metrics::record_outcome(&outcome);

        if outcome.commits() {
            if let Err(e) = self.consumer.commit_message(msg, CommitMode::Async) {
                warn!(
                    partition = msg.partition(),
                    offset = msg.offset(),
                    error = %e,
                    "Failed to commit offset"
                );
            }
        } else {
            warn!(
                partition = msg.partition(),
                offset = msg.offset(),
                "Offset not committed; message will be re-polled"
            );
        }
    }
}
