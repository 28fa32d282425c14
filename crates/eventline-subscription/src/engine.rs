//! The catch-up subscription engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use eventline_core::checkpoint::{CheckpointStore, LeaseDecision};
use eventline_core::clock::{Clock, SystemClock};
use eventline_core::error::StoreError;
use eventline_core::position::{LogPosition, PartitionId};
use eventline_core::scanner::LogScanner;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SubscriptionConfig;
use crate::error::SubscriptionError;
use crate::handler::EventHandler;
use crate::state::SubscriptionState;

/// How a subscription run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionOutcome {
    /// Every state entered, in order, starting with `Initializing`.
    pub transitions: Vec<SubscriptionState>,
    /// Records successfully handed to the handler.
    pub delivered: u64,
    /// The error that faulted the subscription, if any.
    pub fault: Option<SubscriptionError>,
}

impl SubscriptionOutcome {
    /// The state the run ended in.
    #[must_use]
    pub fn final_state(&self) -> SubscriptionState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(SubscriptionState::Initializing)
    }

    /// Converts a faulted outcome into its error.
    ///
    /// # Errors
    ///
    /// Returns the fault if the subscription faulted.
    pub fn into_result(mut self) -> Result<Self, SubscriptionError> {
        match self.fault.take() {
            Some(fault) => Err(fault),
            None => Ok(self),
        }
    }
}

/// Progress of one partition within a run.
#[derive(Debug)]
struct PartitionCursor {
    partition: PartitionId,
    position: LogPosition,
    lease_expires_at: Option<DateTime<Utc>>,
    caught_up: bool,
}

impl PartitionCursor {
    fn new(partition: PartitionId) -> Self {
        Self {
            partition,
            position: LogPosition::Start,
            lease_expires_at: None,
            caught_up: false,
        }
    }

    fn is_leased(&self) -> bool {
        self.lease_expires_at.is_some()
    }
}

/// Publishes state changes and records them for the outcome.
struct Lifecycle {
    current: SubscriptionState,
    transitions: Vec<SubscriptionState>,
    sender: watch::Sender<SubscriptionState>,
}

impl Lifecycle {
    fn new(sender: watch::Sender<SubscriptionState>) -> Self {
        let current = SubscriptionState::Initializing;
        sender.send_replace(current);
        Self {
            current,
            transitions: vec![current],
            sender,
        }
    }

    fn enter(&mut self, next: SubscriptionState) {
        if !self.current.can_transition_to(next) {
            warn!(from = %self.current, to = %next, "ignoring invalid state transition");
            return;
        }
        info!(from = %self.current, to = %next, "subscription state changed");
        self.current = next;
        self.transitions.push(next);
        self.sender.send_replace(next);
    }
}

/// A subscriber's catch-up subscription over every partition of the log.
///
/// Within a partition, records reach the handler in commit order. No order
/// is imposed across partitions.
pub struct CatchUpSubscription {
    config: SubscriptionConfig,
    scanner: Arc<dyn LogScanner>,
    checkpoints: Arc<dyn CheckpointStore>,
    handler: Arc<dyn EventHandler>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CatchUpSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatchUpSubscription")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CatchUpSubscription {
    /// Creates a subscription on the system clock.
    #[must_use]
    pub fn new(
        config: SubscriptionConfig,
        scanner: Arc<dyn LogScanner>,
        checkpoints: Arc<dyn CheckpointStore>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            config,
            scanner,
            checkpoints,
            handler,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock used to time leases.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Spawns the subscription onto the current tokio runtime.
    #[must_use]
    pub fn start(self) -> SubscriptionHandle {
        let cancel = CancellationToken::new();
        let (sender, state) = watch::channel(SubscriptionState::Initializing);
        let subscriber_id = self.config.subscriber_id.clone();
        let checkpoints = Arc::clone(&self.checkpoints);
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { self.run_with(cancel, sender).await }
        });
        SubscriptionHandle {
            subscriber_id,
            cancel,
            state,
            task,
            checkpoints,
        }
    }

    /// Runs the subscription on the calling task until `cancel` fires or it
    /// faults.
    pub async fn run(&self, cancel: CancellationToken) -> SubscriptionOutcome {
        let (sender, _state) = watch::channel(SubscriptionState::Initializing);
        self.run_with(cancel, sender).await
    }

    #[instrument(
        skip_all,
        fields(subscriber_id = %self.config.subscriber_id, owner_id = %self.config.owner_id)
    )]
    async fn run_with(
        &self,
        cancel: CancellationToken,
        sender: watch::Sender<SubscriptionState>,
    ) -> SubscriptionOutcome {
        let mut lifecycle = Lifecycle::new(sender);
        let mut delivered = 0;
        let mut cursors: Vec<PartitionCursor> = self
            .scanner
            .partitions()
            .into_iter()
            .map(PartitionCursor::new)
            .collect();

        let result = self
            .drive(&mut cursors, &mut lifecycle, &mut delivered, &cancel)
            .await;

        let fault = match result {
            Ok(()) => {
                self.release_leases(&cursors).await;
                lifecycle.enter(SubscriptionState::Stopped);
                None
            }
            Err(err) => {
                error!(error = %err, delivered, "subscription faulted");
                lifecycle.enter(SubscriptionState::Faulted);
                Some(err)
            }
        };
        SubscriptionOutcome {
            transitions: lifecycle.transitions,
            delivered,
            fault,
        }
    }

    /// Returns `Ok` once cancelled, `Err` on the first unrecoverable error.
    async fn drive(
        &self,
        cursors: &mut [PartitionCursor],
        lifecycle: &mut Lifecycle,
        delivered: &mut u64,
        cancel: &CancellationToken,
    ) -> Result<(), SubscriptionError> {
        self.claim_leases(cursors).await?;
        lifecycle.enter(SubscriptionState::CatchingUp);

        loop {
            for cursor in cursors.iter_mut().filter(|c| c.is_leased()) {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                self.pump(cursor, delivered, cancel).await?;
            }

            let caught_up = cursors
                .iter()
                .filter(|c| c.is_leased())
                .all(|c| c.caught_up);
            if caught_up {
                if lifecycle.current == SubscriptionState::CatchingUp {
                    lifecycle.enter(SubscriptionState::Live);
                }
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Ok(()),
                    () = tokio::time::sleep(self.config.poll_interval) => {}
                }
            } else if cancel.is_cancelled() {
                return Ok(());
            }

            self.claim_leases(cursors).await?;
        }
    }

    /// Acquires leases on unleased partitions and renews leases past their
    /// half-life. A newly won partition resumes from its saved checkpoint.
    async fn claim_leases(&self, cursors: &mut [PartitionCursor]) -> Result<(), SubscriptionError> {
        let now = self.clock.now();
        let renew_margin =
            chrono::Duration::from_std(self.config.lease_ttl / 2).unwrap_or(chrono::Duration::zero());
        let subscriber_id = self.config.subscriber_id.as_str();
        let owner_id = self.config.owner_id.as_str();

        for cursor in cursors.iter_mut() {
            match cursor.lease_expires_at {
                Some(expires_at) if now + renew_margin < expires_at => continue,
                _ => {}
            }

            let decision = self
                .checkpoints
                .acquire_lease(subscriber_id, cursor.partition, owner_id, self.config.lease_ttl, now)
                .await?;
            match decision {
                LeaseDecision::Granted { expires_at } => {
                    if !cursor.is_leased() {
                        cursor.position = self
                            .checkpoints
                            .load_checkpoint(subscriber_id, cursor.partition)
                            .await?;
                        cursor.caught_up = false;
                        info!(
                            partition = %cursor.partition,
                            position = ?cursor.position,
                            "partition lease acquired"
                        );
                    }
                    cursor.lease_expires_at = Some(expires_at);
                }
                LeaseDecision::Denied { holder, expires_at } => {
                    if cursor.is_leased() {
                        warn!(partition = %cursor.partition, %holder, "partition lease lost");
                    } else {
                        debug!(partition = %cursor.partition, %holder, %expires_at, "partition leased elsewhere");
                    }
                    cursor.lease_expires_at = None;
                }
            }
        }
        Ok(())
    }

    /// Pulls one batch, delivers it, then checkpoints it. A stop request
    /// abandons the pull, leaving the cursor where it was.
    async fn pump(
        &self,
        cursor: &mut PartitionCursor,
        delivered: &mut u64,
        cancel: &CancellationToken,
    ) -> Result<(), SubscriptionError> {
        let partition = cursor.partition;
        let from = cursor.position.clone();
        let pull = self.config.retry.run_cancellable("scan", cancel, |_| {
            self.scanner.scan(partition, &from, self.config.batch_size)
        });
        let batch = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            batch = pull => match batch {
                Err(StoreError::Cancelled) => return Ok(()),
                other => other?,
            },
        };

        for record in &batch.records {
            self.handler
                .handle(record)
                .await
                .map_err(|source| SubscriptionError::Handler {
                    stream_id: record.stream_id.clone(),
                    offset: record.offset,
                    event_id: record.event_id,
                    source,
                })?;
            *delivered += 1;
        }

        if let Some(token) = batch.next.token().filter(|_| !batch.records.is_empty()) {
            self.checkpoints
                .save_checkpoint(&self.config.subscriber_id, partition, token)
                .await?;
            debug!(%partition, %token, count = batch.records.len(), "checkpoint advanced");
        }
        cursor.position = batch.next;
        cursor.caught_up = batch.at_end;
        Ok(())
    }

    async fn release_leases(&self, cursors: &[PartitionCursor]) {
        for cursor in cursors.iter().filter(|c| c.is_leased()) {
            if let Err(err) = self
                .checkpoints
                .release_lease(&self.config.subscriber_id, cursor.partition, &self.config.owner_id)
                .await
            {
                warn!(partition = %cursor.partition, error = %err, "failed to release partition lease");
            }
        }
    }
}

/// Control handle of a spawned subscription.
pub struct SubscriptionHandle {
    subscriber_id: String,
    cancel: CancellationToken,
    state: watch::Receiver<SubscriptionState>,
    task: JoinHandle<SubscriptionOutcome>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("subscriber_id", &self.subscriber_id)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl SubscriptionHandle {
    /// The current state.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// A receiver notified on every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.clone()
    }

    /// Waits until the subscription reaches `target` or a terminal state, and
    /// returns the state reached.
    pub async fn wait_for(&self, target: SubscriptionState) -> SubscriptionState {
        let mut receiver = self.state.clone();
        let reached = receiver
            .wait_for(|state| *state == target || state.is_terminal())
            .await
            .map(|state| *state);
        reached.unwrap_or_else(|_| *receiver.borrow())
    }

    /// Requests a stop. A batch being delivered finishes and is
    /// checkpointed; a pending pull is abandoned.
    pub fn stop(&self) {
        info!(subscriber_id = %self.subscriber_id, "subscription stop requested");
        self.cancel.cancel();
    }

    /// Waits for the subscription task to end.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError::Task` if the task panicked or was aborted.
    /// A fault of the subscription itself is reported in the outcome.
    pub async fn join(self) -> Result<SubscriptionOutcome, SubscriptionError> {
        self.task
            .await
            .map_err(|err| SubscriptionError::Task(err.to_string()))
    }

    /// Stops the subscription and waits for it to end.
    ///
    /// # Errors
    ///
    /// See [`SubscriptionHandle::join`].
    pub async fn stop_and_join(self) -> Result<SubscriptionOutcome, SubscriptionError> {
        self.stop();
        self.join().await
    }

    /// Stops the subscription and deletes every checkpoint of its
    /// subscriber.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError::Store` if the checkpoints cannot be
    /// deleted, or `SubscriptionError::Task` as for `join`.
    pub async fn tear_down(self) -> Result<SubscriptionOutcome, SubscriptionError> {
        let checkpoints = Arc::clone(&self.checkpoints);
        let subscriber_id = self.subscriber_id.clone();
        let outcome = self.stop_and_join().await?;
        let removed = checkpoints.delete_subscriber(&subscriber_id).await?;
        info!(%subscriber_id, removed, "subscriber torn down");
        Ok(outcome)
    }
}
