//! Consumer group runtime.
//!
//! One `Consumer` is one member of one group: it joins, pulls batches, decodes
//! each record, hands it to its handler and commits progress. Groups never
//! share state; each runs its own `Consumer` with its own group id, so a slow
//! or failing group only ever holds back its own cursor.

use crate::error::{HandlerError, PipelineError, Result};
use crate::failure::{FailureSink, LogFailureSink, PipelineFailure};
use crate::handlers::MessageHandler;
use crate::offsets::{CommitPolicy, OffsetTracker};
use crate::retry::{with_retry, RetryPolicy};
use crate::shutdown::ShutdownHandle;
use crate::transport::{FetchOptions, GroupConnector, Record, Subscription};
use order_events::KafkaMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Smallest batch cap librdkafka accepts for `message.max.bytes`.
const MIN_MAX_BYTES: usize = 1_000;

/// Configuration for one consumer group member.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Topic to read.
    pub topic: String,

    /// Consumer group ID. Distinct ids each see the full stream.
    pub group_id: String,

    /// Batching thresholds for each pull.
    pub fetch: FetchOptions,

    /// When processed offsets are committed.
    pub commit: CommitPolicy,

    /// Retries for joining and fetching before the group stops.
    pub read_retry: RetryPolicy,

    /// Retries for transient handler failures.
    pub handler_retry: RetryPolicy,
}

impl ConsumerConfig {
    /// Creates a new consumer configuration.
    ///
    /// # Arguments
    ///
    /// * `topic` - Topic to read
    /// * `group_id` - Consumer group ID
    pub fn new(topic: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group_id: group_id.into(),
            fetch: FetchOptions::default(),
            commit: CommitPolicy::PerMessage,
            read_retry: RetryPolicy::new(5),
            handler_retry: RetryPolicy::default(),
        }
    }

    /// Bytes to accumulate before a pull returns early.
    pub fn with_min_bytes(mut self, bytes: usize) -> Self {
        self.fetch.min_bytes = bytes;
        self
    }

    /// Upper bound on the bytes returned by one pull.
    pub fn with_max_bytes(mut self, bytes: usize) -> Self {
        self.fetch.max_bytes = bytes;
        self
    }

    /// How long a pull may wait for `min_bytes` before returning what it has.
    pub fn with_max_wait(mut self, duration: Duration) -> Self {
        self.fetch.max_wait = duration;
        self
    }

    pub fn with_max_records(mut self, records: usize) -> Self {
        self.fetch.max_records = records;
        self
    }

    pub fn with_commit_policy(mut self, policy: CommitPolicy) -> Self {
        self.commit = policy;
        self
    }

    /// Commit interval; `Duration::ZERO` commits after every message.
    pub fn with_commit_interval(mut self, interval: Duration) -> Self {
        self.commit = CommitPolicy::from_interval(interval);
        self
    }

    pub fn with_read_retry(mut self, policy: RetryPolicy) -> Self {
        self.read_retry = policy;
        self
    }

    pub fn with_handler_retry(mut self, policy: RetryPolicy) -> Self {
        self.handler_retry = policy;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(PipelineError::Config("consumer topic is empty".into()));
        }
        if self.group_id.trim().is_empty() {
            return Err(PipelineError::Config("consumer group id is empty".into()));
        }
        if self.fetch.max_bytes < MIN_MAX_BYTES {
            return Err(PipelineError::Config(format!(
                "max bytes ({}) below {} for group '{}'",
                self.fetch.max_bytes, MIN_MAX_BYTES, self.group_id
            )));
        }
        if self.fetch.max_wait.is_zero() {
            return Err(PipelineError::Config(format!(
                "max wait must be positive for group '{}'",
                self.group_id
            )));
        }
        if self.fetch.min_bytes > self.fetch.max_bytes {
            return Err(PipelineError::Config(format!(
                "min bytes ({}) exceeds max bytes ({}) for group '{}'",
                self.fetch.min_bytes, self.fetch.max_bytes, self.group_id
            )));
        }
        if self.fetch.max_records == 0 {
            return Err(PipelineError::Config("max records must be positive".into()));
        }
        Ok(())
    }
}

/// Where a consumer is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Joining,
    Reading,
    Handling,
    Committing,
    /// Backing off after a failed join or fetch.
    Retrying,
    Stopped,
}

/// What one `run` did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Messages the handler accepted.
    pub handled: u64,
    /// Messages skipped without reaching the handler (undecodable, empty).
    pub skipped: u64,
    /// Messages the handler gave up on.
    pub failed: u64,
    /// Successful offset commits.
    pub commits: u64,
}

/// Type-safe consumer group member.
///
/// Decodes every record as the handler's message type and hands it over. Offsets of skipped and
/// failed messages advance like handled ones so a poison message cannot stall
/// the group. Uncommitted progress is redelivered after a restart.
pub struct Consumer<C, H> {
    connector: C,
    handler: H,
    config: ConsumerConfig,
    sink: Arc<dyn FailureSink>,
    shutdown: ShutdownHandle,
    state: watch::Sender<ConsumerState>,
}

impl<C, H> Consumer<C, H>
where
    C: GroupConnector,
    H: MessageHandler,
{
    /// Creates a new consumer group member.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` if the configuration is inconsistent.
    pub fn new(config: ConsumerConfig, connector: C, handler: H) -> Result<Self> {
        config.validate()?;
        let (state, _) = watch::channel(ConsumerState::Joining);

        Ok(Self {
            connector,
            handler,
            config,
            sink: Arc::new(LogFailureSink),
            shutdown: ShutdownHandle::new(),
            state,
        })
    }

    /// Routes skipped and failed messages to `sink` instead of only logging.
    pub fn with_failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Shares an existing shutdown signal, typically with sibling roles.
    pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Returns a shutdown handle that can be used to stop this consumer from
    /// another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }

    /// Runs the consumer until shutdown or an unrecoverable read failure.
    ///
    /// Pending offsets are flushed and the group is left on every exit path.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::ReadFailed` once joining or fetching has failed
    /// more often than the read retry policy allows.
    pub async fn run(&self) -> Result<RunReport> {
        info!(
            group = %self.config.group_id,
            topic = %self.config.topic,
            "Starting consumer loop"
        );

        let mut report = RunReport::default();
        let mut subscription = match self.join().await {
            Ok(Some(subscription)) => subscription,
            Ok(None) => {
                self.set_state(ConsumerState::Stopped);
                return Ok(report);
            }
            Err(e) => {
                self.set_state(ConsumerState::Stopped);
                return Err(e);
            }
        };

        let mut offsets = OffsetTracker::new(self.config.commit);
        let outcome = self
            .consume(&mut subscription, &mut offsets, &mut report)
            .await;

        if offsets.has_pending() {
            self.commit(&mut subscription, &mut offsets, &mut report)
                .await;
        }
        if let Err(e) = subscription.close().await {
            warn!(group = %self.config.group_id, "Failed to leave group: {}", e);
        }
        self.set_state(ConsumerState::Stopped);

        info!(
            group = %self.config.group_id,
            handled = report.handled,
            skipped = report.skipped,
            failed = report.failed,
            commits = report.commits,
            "Consumer stopped"
        );
        outcome.map(|()| report)
    }

    /// Joins the group, retrying under the read policy. `None` on shutdown.
    async fn join(&self) -> Result<Option<C::Subscription>> {
        let mut failures = 0;

        loop {
            if self.shutdown.is_shutdown() {
                return Ok(None);
            }
            self.set_state(ConsumerState::Joining);

            match self
                .connector
                .join(&self.config.topic, &self.config.group_id, &self.config.fetch)
                .await
            {
                Ok(subscription) => {
                    info!(group = %self.config.group_id, "Joined consumer group");
                    return Ok(Some(subscription));
                }
                Err(e) => {
                    failures += 1;
                    self.back_off(failures, e).await?;
                }
            }
        }
    }

    async fn consume(
        &self,
        subscription: &mut C::Subscription,
        offsets: &mut OffsetTracker,
        report: &mut RunReport,
    ) -> Result<()> {
        let mut failures = 0;

        loop {
            if self.shutdown.is_shutdown() {
                info!(group = %self.config.group_id, "Shutdown signal received, stopping consumer");
                return Ok(());
            }

            self.set_state(ConsumerState::Reading);
            let fetched = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => continue,
                fetched = subscription.fetch() => fetched,
            };

            let batch = match fetched {
                Ok(batch) => {
                    failures = 0;
                    batch
                }
                Err(e) => {
                    failures += 1;
                    self.back_off(failures, e).await?;
                    continue;
                }
            };

            if !batch.is_empty() {
                debug!(group = %self.config.group_id, records = batch.len(), "Received batch");
            }

            for record in batch {
                // Records left unprocessed here are redelivered after restart.
                if self.shutdown.is_shutdown() {
                    break;
                }

                self.set_state(ConsumerState::Handling);
                if !self.process(&record, report).await {
                    break;
                }
                offsets.mark(record.partition, record.offset);

                if offsets.is_due() {
                    self.commit(subscription, offsets, report).await;
                }
            }

            if offsets.is_due() {
                self.commit(subscription, offsets, report).await;
            }
        }
    }

    /// Waits out a failed join or fetch, or gives up once the read policy is
    /// exhausted.
    async fn back_off(&self, failures: u32, error: PipelineError) -> Result<()> {
        let policy = &self.config.read_retry;

        if !policy.should_retry(failures) {
            error!(
                group = %self.config.group_id,
                attempts = failures,
                "Error reading message: {}",
                error
            );
            self.sink
                .report(PipelineFailure::ReadFailed {
                    group: self.config.group_id.clone(),
                    attempts: failures,
                    reason: error.to_string(),
                })
                .await;
            return Err(PipelineError::ReadFailed {
                group: self.config.group_id.clone(),
                attempts: failures,
                reason: error.to_string(),
            });
        }

        let delay = policy.backoff(failures);
        warn!(
            group = %self.config.group_id,
            attempt = failures,
            max_retries = policy.max_retries,
            "Error reading message: {}. Retrying in {:?}",
            error,
            delay
        );
        self.set_state(ConsumerState::Retrying);
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
        Ok(())
    }

    /// Decodes and handles one record. Returns `false` if shutdown interrupted
    /// the handler; the record is then left unmarked and redelivered after
    /// restart. Every other outcome lets the offset advance.
    async fn process(&self, record: &Record, report: &mut RunReport) -> bool {
        let group = &self.config.group_id;

        let Some(payload) = record.payload.as_deref() else {
            warn!(
                %group,
                partition = record.partition,
                offset = record.offset,
                "Received message with no payload"
            );
            self.sink
                .report(PipelineFailure::DecodeFailed {
                    group: group.clone(),
                    partition: record.partition,
                    offset: record.offset,
                    reason: "empty payload".to_string(),
                })
                .await;
            report.skipped += 1;
            return true;
        };

        let message = match <H::Message as KafkaMessage>::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    %group,
                    partition = record.partition,
                    offset = record.offset,
                    "Error decoding message: {}",
                    e
                );
                self.sink
                    .report(PipelineFailure::DecodeFailed {
                        group: group.clone(),
                        partition: record.partition,
                        offset: record.offset,
                        reason: e.to_string(),
                    })
                    .await;
                report.skipped += 1;
                return true;
            }
        };

        let handled = with_retry(
            &self.config.handler_retry,
            group,
            HandlerError::is_retryable,
            || self.handler.handle(&message),
        );
        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                warn!(
                    %group,
                    partition = record.partition,
                    offset = record.offset,
                    "Shutdown interrupted handler, message left uncommitted"
                );
                return false;
            }
            outcome = handled => outcome,
        };

        match outcome {
            Ok(()) => {
                debug!(
                    %group,
                    partition = record.partition,
                    offset = record.offset,
                    key = ?message.key(),
                    "Message handled"
                );
                report.handled += 1;
            }
            Err(exhausted) => {
                error!(
                    %group,
                    partition = record.partition,
                    offset = record.offset,
                    attempts = exhausted.attempts,
                    "Failed to process message: {}",
                    exhausted.error
                );
                self.sink
                    .report(PipelineFailure::HandlerFailed {
                        group: group.clone(),
                        partition: record.partition,
                        offset: record.offset,
                        key: message.key().map(str::to_string),
                        reason: exhausted.error.to_string(),
                    })
                    .await;
                report.failed += 1;
            }
        }
        true
    }

    async fn commit(
        &self,
        subscription: &mut C::Subscription,
        offsets: &mut OffsetTracker,
        report: &mut RunReport,
    ) {
        let positions = offsets.pending();
        self.set_state(ConsumerState::Committing);

        match subscription.commit(&positions).await {
            Ok(()) => {
                debug!(group = %self.config.group_id, ?positions, "Committed offsets");
                offsets.committed(&positions);
                report.commits += 1;
            }
            Err(e) => {
                // Pending offsets stay queued for the next commit.
                error!(group = %self.config.group_id, "Failed to commit offset: {}", e);
            }
        }
    }
}
