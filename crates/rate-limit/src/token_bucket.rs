use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gatehouse_common::BucketConfig;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;

use crate::error::BucketError;

/// Slack for float comparisons of accumulated volume.
const EPSILON: f64 = 1e-9;

/// Upper bound on a single scheduled wakeup.
const MAX_WAKE_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Outcome of a grant request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grant {
    pub granted: bool,
    /// Units handed out; zero when denied.
    pub amount: f64,
    /// Time spent queued before the request was resolved.
    pub wait_time: Duration,
}

impl Grant {
    fn immediate(amount: f64) -> Self {
        Self {
            granted: true,
            amount,
            wait_time: Duration::ZERO,
        }
    }

    fn denied(wait_time: Duration) -> Self {
        Self {
            granted: false,
            amount: 0.0,
            wait_time,
        }
    }
}

/// Point-in-time view of a bucket, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketSnapshot {
    pub available_burst: f64,
    pub now: Instant,
    pub waiter_count: usize,
    pub capacity: f64,
    /// Units per second.
    pub flow_rate: f64,
    pub max_waiters: Option<usize>,
    pub partial_tokens: bool,
}

/// A continuous-time token bucket with a bounded FIFO waiter queue.
///
/// Volume refills at `flow_rate` units per second up to `capacity` and is
/// recomputed lazily from elapsed time on every access; there is no
/// background ticker. Requests that cannot be satisfied immediately wait in
/// strict arrival order. A queue servicer task sleeps until the instant the
/// head waiter can be filled and exits once the queue is empty.
///
/// The bucket is cheaply cloneable (backed by `Arc`); clones share state.
#[derive(Clone)]
pub struct TokenBucket {
    inner: Arc<BucketInner>,
}

struct BucketInner {
    capacity: f64,
    flow_rate: f64,
    partial_tokens: bool,
    max_waiters: Option<usize>,
    max_queue_grant_size: f64,
    state: Mutex<BucketState>,
    /// Wakes the servicer early when the queue head changes out of turn.
    queue_changed: Notify,
}

struct BucketState {
    volume: f64,
    last_refill: Instant,
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
    servicer_running: bool,
    closed: bool,
}

struct Waiter {
    id: u64,
    requested: f64,
    granted: f64,
    enqueued_at: Instant,
    tx: oneshot::Sender<Grant>,
}

impl BucketState {
    fn refill(&mut self, now: Instant, capacity: f64, flow_rate: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.volume = (self.volume + elapsed * flow_rate).min(capacity);
        self.last_refill = now;
    }

    /// Return units to the bucket, never past capacity.
    fn credit(&mut self, amount: f64, capacity: f64) {
        self.volume = (self.volume + amount).min(capacity);
    }
}

impl TokenBucket {
    /// Create a bucket from its configuration.
    pub fn new(config: &BucketConfig) -> Result<Self, BucketError> {
        let capacity = config.max_burst_size;
        if !(capacity.is_finite() && capacity > 0.0) {
            return Err(BucketError::InvalidCapacity(capacity));
        }

        let flow_rate = config.flow_rate.as_per_second();
        if !(flow_rate.is_finite() && flow_rate > 0.0) {
            return Err(BucketError::InvalidFlowRate(flow_rate));
        }

        let initial_volume = config.initial_volume.unwrap_or(capacity);
        if !(initial_volume.is_finite() && (0.0..=capacity).contains(&initial_volume)) {
            return Err(BucketError::InvalidInitialVolume {
                volume: initial_volume,
                capacity,
            });
        }

        let max_queue_grant_size = config.max_queue_grant_size.unwrap_or(capacity);
        if !(max_queue_grant_size.is_finite()
            && max_queue_grant_size > 0.0
            && max_queue_grant_size <= capacity)
        {
            return Err(BucketError::InvalidQueueGrantSize {
                size: max_queue_grant_size,
                capacity,
            });
        }

        tracing::info!(
            capacity,
            flow_rate = %config.flow_rate,
            max_waiters = ?config.max_queue_size,
            partial_tokens = config.partial_tokens,
            "creating token bucket"
        );

        Ok(Self {
            inner: Arc::new(BucketInner {
                capacity,
                flow_rate,
                partial_tokens: config.partial_tokens,
                max_waiters: config.max_queue_size,
                max_queue_grant_size,
                state: Mutex::new(BucketState {
                    volume: initial_volume,
                    last_refill: Instant::now(),
                    waiters: VecDeque::new(),
                    next_waiter_id: 0,
                    servicer_running: false,
                    closed: false,
                }),
                queue_changed: Notify::new(),
            }),
        })
    }

    /// Take `amount` units if they are available right now.
    ///
    /// Never waits and never jumps ahead of queued waiters. Returns `false`
    /// for negative or non-finite amounts and after
    /// [`deny_all_requests`](Self::deny_all_requests).
    pub fn take_now(&self, amount: f64) -> bool {
        if !valid_amount(amount) {
            return false;
        }

        let mut state = self.inner.lock_state();
        if state.closed || !state.waiters.is_empty() {
            return false;
        }

        state.refill(Instant::now(), self.inner.capacity, self.inner.flow_rate);
        if state.volume + EPSILON >= amount {
            state.volume = (state.volume - amount).max(0.0);
            true
        } else {
            false
        }
    }

    /// Request `amount` units, waiting in line if they are not available.
    ///
    /// Resolves immediately with a grant when the queue is empty and enough
    /// volume is on hand, and immediately with a denial when the queue is
    /// full, the bucket has been shut down, or the request could never be
    /// filled (more than `capacity` units without partial tokens). Otherwise
    /// the caller waits until every earlier waiter has been served and its
    /// own amount has accrued. With partial tokens the amount is delivered in
    /// steps of at most `max_queue_grant_size` as volume accrues.
    ///
    /// Dropping the returned future removes the request from the queue and
    /// returns any partially delivered units to the bucket.
    pub async fn request_grant(&self, amount: f64) -> Grant {
        let started = Instant::now();

        let (id, rx) = {
            let mut state = self.inner.lock_state();
            if state.closed || !valid_amount(amount) {
                return Grant::denied(Duration::ZERO);
            }

            state.refill(started, self.inner.capacity, self.inner.flow_rate);
            if state.waiters.is_empty() && state.volume + EPSILON >= amount {
                state.volume = (state.volume - amount).max(0.0);
                return Grant::immediate(amount);
            }

            if !self.inner.partial_tokens && amount > self.inner.capacity + EPSILON {
                return Grant::denied(Duration::ZERO);
            }

            if let Some(max_waiters) = self.inner.max_waiters {
                if state.waiters.len() >= max_waiters {
                    return Grant::denied(Duration::ZERO);
                }
            }

            let (tx, rx) = oneshot::channel();
            let id = state.next_waiter_id;
            state.next_waiter_id += 1;
            state.waiters.push_back(Waiter {
                id,
                requested: amount,
                granted: 0.0,
                enqueued_at: started,
                tx,
            });

            if !state.servicer_running {
                state.servicer_running = true;
                tokio::spawn(service_queue(Arc::clone(&self.inner)));
            }

            (id, rx)
        };

        let mut pending = PendingRequest {
            inner: Arc::clone(&self.inner),
            id,
            resolved: false,
        };
        let result = rx.await;
        pending.resolved = true;

        result.unwrap_or_else(|_| Grant::denied(started.elapsed()))
    }

    /// Deny every queued waiter and refuse all later requests.
    ///
    /// Safe to call concurrently with in-flight requests and more than once.
    pub fn deny_all_requests(&self) {
        let drained: Vec<Waiter> = {
            let mut state = self.inner.lock_state();
            state.closed = true;
            let drained: Vec<Waiter> = state.waiters.drain(..).collect();
            let returned: f64 = drained.iter().map(|w| w.granted).sum();
            state.credit(returned, self.inner.capacity);
            drained
        };

        if !drained.is_empty() {
            tracing::debug!(denied = drained.len(), "token bucket denied all waiters");
        }

        let now = Instant::now();
        for waiter in drained {
            let _ = waiter
                .tx
                .send(Grant::denied(now.saturating_duration_since(waiter.enqueued_at)));
        }

        self.inner.queue_changed.notify_one();
    }

    /// Side-effect-free view of the current state.
    pub fn snapshot_now(&self) -> BucketSnapshot {
        let state = self.inner.lock_state();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();

        BucketSnapshot {
            available_burst: (state.volume + elapsed * self.inner.flow_rate)
                .min(self.inner.capacity),
            now,
            waiter_count: state.waiters.len(),
            capacity: self.inner.capacity,
            flow_rate: self.inner.flow_rate,
            max_waiters: self.inner.max_waiters,
            partial_tokens: self.inner.partial_tokens,
        }
    }

    pub fn capacity(&self) -> f64 {
        self.inner.capacity
    }

    pub fn partial_tokens(&self) -> bool {
        self.inner.partial_tokens
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().closed
    }
}

impl BucketInner {
    fn lock_state(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand out accrued volume to waiters in FIFO order.
    ///
    /// Returns the instant the head waiter's next step will be fillable, or
    /// `None` once the queue is empty.
    fn serve_waiters(&self, state: &mut BucketState, now: Instant) -> Option<Instant> {
        loop {
            let head = state.waiters.front_mut()?;

            if head.tx.is_closed() {
                if let Some(gone) = state.waiters.pop_front() {
                    state.credit(gone.granted, self.capacity);
                }
                continue;
            }

            let outstanding = head.requested - head.granted;
            let step = if self.partial_tokens {
                outstanding.min(self.max_queue_grant_size)
            } else {
                outstanding
            };

            if self.partial_tokens {
                let delivered = state.volume.min(step);
                if delivered > EPSILON {
                    head.granted += delivered;
                    state.volume = (state.volume - delivered).max(0.0);
                }
            } else if state.volume + EPSILON >= step {
                head.granted = head.requested;
                state.volume = (state.volume - step).max(0.0);
            }

            if head.granted + EPSILON >= head.requested {
                if let Some(done) = state.waiters.pop_front() {
                    let _ = done.tx.send(Grant {
                        granted: true,
                        amount: done.requested,
                        wait_time: now.saturating_duration_since(done.enqueued_at),
                    });
                }
                continue;
            }

            let outstanding = head.requested - head.granted;
            let next_step = if self.partial_tokens {
                outstanding.min(self.max_queue_grant_size)
            } else {
                outstanding
            };
            let deficit = (next_step - state.volume).max(EPSILON);
            let delay = Duration::try_from_secs_f64(deficit / self.flow_rate)
                .unwrap_or(MAX_WAKE_DELAY)
                .min(MAX_WAKE_DELAY);
            return Some(now + delay);
        }
    }
}

/// Drives the waiter queue until it is empty.
async fn service_queue(inner: Arc<BucketInner>) {
    loop {
        let wake_at = {
            let mut state = inner.lock_state();
            let now = Instant::now();
            state.refill(now, inner.capacity, inner.flow_rate);
            match inner.serve_waiters(&mut state, now) {
                Some(wake_at) => wake_at,
                None => {
                    state.servicer_running = false;
                    return;
                }
            }
        };

        tokio::select! {
            _ = tokio::time::sleep_until(wake_at) => {}
            _ = inner.queue_changed.notified() => {}
        }
    }
}

/// Removes a waiter from the queue if its request future is dropped before
/// resolution.
struct PendingRequest {
    inner: Arc<BucketInner>,
    id: u64,
    resolved: bool,
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }

        let mut state = self.inner.lock_state();
        let position = state.waiters.iter().position(|w| w.id == self.id);
        let Some(gone) = position.and_then(|pos| state.waiters.remove(pos)) else {
            return;
        };

        state.refill(Instant::now(), self.inner.capacity, self.inner.flow_rate);
        state.credit(gone.granted, self.inner.capacity);
        drop(state);
        self.inner.queue_changed.notify_one();
    }
}

fn valid_amount(amount: f64) -> bool {
    amount.is_finite() && amount >= 0.0
}
