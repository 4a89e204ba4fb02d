//! Lock acquisition state machine
//!
//! ```text
//! Creating -> Ranking -> Waiting <-> Ranking -> Acquired
//!                    \-> Rejected (admission cap)
//! any state -> Aborted (timeout or store error)
//! ```
//!
//! Each call to [`LockRequest::step`] performs one suspension point and
//! returns the next state. Terminal failures are returned as errors and
//! cleaned up by [`LockRequest::acquire`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::admission::{self, Admission};
use super::contender::Contender;
use super::directory::ContenderPath;
use super::ranking::{self, Ranking};
use crate::error::{LockError, Result, StoreError};
use crate::store::{ExistenceWatch, StoreOp, WatchReceiver, join_path, split_path};

/// Acquisition state.
#[derive(Debug)]
pub(crate) enum State {
    Creating,
    Ranking {
        /// Empty listings seen so far
        empty_listings: u32,
    },
    Waiting {
        predecessor: String,
        watch: WatchReceiver,
    },
    Acquired,
}

impl State {
    fn ranking() -> Self {
        State::Ranking { empty_listings: 0 }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Creating => f.write_str("creating"),
            State::Ranking { .. } => f.write_str("ranking"),
            State::Waiting { predecessor, .. } => write!(f, "waiting on {}", predecessor),
            State::Acquired => f.write_str("acquired"),
        }
    }
}

pub(crate) struct LockRequest {
    contender: Arc<Contender>,
    target: ContenderPath,
    limit: Option<usize>,
    timeout: Option<Duration>,
    listing_retries: u32,
    listing_retry_delay: Duration,
    /// Sequence assigned at creation
    sequence: Option<u64>,
}

impl LockRequest {
    pub(crate) fn new(
        contender: Arc<Contender>,
        target: ContenderPath,
        limit: Option<usize>,
        timeout: Option<Duration>,
        listing_retries: u32,
        listing_retry_delay: Duration,
    ) -> Self {
        Self {
            contender,
            target,
            limit,
            timeout,
            listing_retries,
            listing_retry_delay,
            sequence: None,
        }
    }

    pub(crate) fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    /// Drive the state machine to completion, cleaning up on failure.
    pub(crate) async fn acquire(&mut self) -> Result<()> {
        match self.run().await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.abort(err).await),
        }
    }

    async fn run(&mut self) -> Result<()> {
        let mut state = State::Creating;
        loop {
            state = self.step(state).await?;
            if matches!(state, State::Acquired) {
                return Ok(());
            }
            // A timer may have fired while we were suspended
            if self.contender.is_timed_out() {
                return Err(self.timed_out());
            }
        }
    }

    /// Perform one transition.
    pub(crate) async fn step(&mut self, state: State) -> Result<State> {
        match state {
            State::Creating => self.create().await,
            State::Ranking { empty_listings } => self.rank(empty_listings).await,
            State::Waiting { predecessor, watch } => self.wait(predecessor, watch).await,
            State::Acquired => Ok(State::Acquired),
        }
    }

    async fn create(&mut self) -> Result<State> {
        let store = self.contender.store();
        let parent = &self.target.parent;

        match store.ensure_node(parent).await {
            Ok(()) => {}
            // Another contender created it concurrently
            Err(e) if e.is_node_exists() => {}
            Err(e) => {
                self.contender.logger().error(&format!(
                    "failed to create dir on path {} due to error {}",
                    parent, e
                ));
                return Err(LockError::store(StoreOp::Ensure, parent.as_str(), e));
            }
        }

        let assigned = store
            .create_sequential_ephemeral(&self.target.physical)
            .await
            .map_err(|e| LockError::store(StoreOp::Create, self.target.physical.as_str(), e))?;
        self.contender.set_node(assigned.clone()).await;
        self.contender.logger().info(&format!(
            "child created at dir {} for {}: {}",
            parent, self.target.resource, assigned
        ));

        let sequence = split_path(&assigned)
            .and_then(|(_, name)| ranking::parse_sequence(name, &self.target.prefix))
            .ok_or_else(|| LockError::ChildNotFound(assigned.clone()))?;
        self.sequence = Some(sequence);

        Ok(State::ranking())
    }

    async fn rank(&mut self, empty_listings: u32) -> Result<State> {
        let own_path = self.own_path();
        let Some(sequence) = self.sequence else {
            return Err(LockError::ChildNotFound(own_path));
        };

        let children = self
            .contender
            .store()
            .list_children(&self.target.parent)
            .await
            .map_err(|e| LockError::store(StoreOp::List, self.target.parent.as_str(), e))?;
        let siblings = ranking::contenders(&children, &self.target.prefix);

        if siblings.is_empty() {
            // The listing raced our own creation; nothing observed yet
            if empty_listings < self.listing_retries {
                tokio::time::sleep(self.listing_retry_delay).await;
                return Ok(State::Ranking {
                    empty_listings: empty_listings + 1,
                });
            }
            return Err(LockError::ChildNotFound(own_path));
        }

        if let Admission::Rejected { ahead, limit } =
            admission::evaluate(&siblings, sequence, self.limit)
        {
            self.contender.logger().error(&format!(
                "max child lock limit {} reached for {}, rejecting {}",
                limit, self.target.resource, own_path
            ));
            return Err(LockError::AdmissionLimitExceeded {
                resource: self.target.resource.clone(),
                ahead,
                limit,
            });
        }

        let Some(Ranking { predecessor, .. }) = ranking::rank(&siblings, sequence) else {
            return Err(LockError::ChildNotFound(own_path));
        };

        let Some(predecessor) = predecessor else {
            if !self.contender.try_acquire() {
                return Err(self.timed_out());
            }
            self.contender
                .logger()
                .info(&format!("lock acquired by {}", own_path));
            return Ok(State::Acquired);
        };

        let predecessor = join_path(&self.target.parent, &predecessor.name);
        self.contender
            .logger()
            .info(&format!("watching for {} by {}", predecessor, own_path));

        match self.contender.store().watch_existence(&predecessor).await {
            Ok(ExistenceWatch::Present(watch)) => Ok(State::Waiting { predecessor, watch }),
            // Released between listing and registration
            Ok(ExistenceWatch::Absent) => Ok(State::ranking()),
            Err(e) => {
                self.contender.logger().error(&format!(
                    "error while watching node {} by {}",
                    predecessor, own_path
                ));
                Err(LockError::store(StoreOp::Watch, predecessor, e))
            }
        }
    }

    async fn wait(&mut self, predecessor: String, watch: WatchReceiver) -> Result<State> {
        tokio::select! {
            fired = watch => match fired {
                Ok(event) => {
                    self.contender.logger().info(&format!(
                        "{:?} on {} observed by {}",
                        event,
                        predecessor,
                        self.own_path()
                    ));
                    Ok(State::ranking())
                }
                Err(_) => {
                    self.contender.logger().error(&format!(
                        "error while watching node {} by {}",
                        predecessor,
                        self.own_path()
                    ));
                    Err(LockError::store(
                        StoreOp::Watch,
                        predecessor,
                        StoreError::ConnectionLoss,
                    ))
                }
            },
            _ = self.contender.cancelled() => Err(self.timed_out()),
        }
    }

    /// Clean up after a failed acquisition and pick the error to surface.
    async fn abort(&self, err: LockError) -> LockError {
        if self.contender.is_timed_out() {
            // The timer may have fired before the node existed
            if let Err(e) = self.contender.remove_node().await {
                self.contender
                    .logger()
                    .error(&format!("failed to remove timed out contender: {}", e));
            }
            return self.timed_out();
        }

        self.contender.logger().error(&format!(
            "lock attempt on {} failed: {}",
            self.target.resource, err
        ));
        if let Err(e) = self.contender.release().await {
            self.contender
                .logger()
                .error(&format!("failed to release contender after error: {}", e));
        }
        err
    }

    fn timed_out(&self) -> LockError {
        LockError::AcquisitionTimedOut {
            resource: self.target.resource.clone(),
            timeout: self.timeout.unwrap_or_default(),
        }
    }

    fn own_path(&self) -> String {
        self.contender
            .path()
            .unwrap_or(self.target.physical.as_str())
            .to_string()
    }
}
