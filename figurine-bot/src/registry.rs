//! Session registry.
//!
//! Process-wide per-user coordination state:
//! - at most one pending wait per user (style + expiry timer),
//! - the set of users with a request in flight (plus an optional deferred
//!   release timer once a request succeeded).
//!
//! Every operation takes the single state lock for its whole duration, so
//! callers never observe a half-updated registry. Timers are tokio tasks whose
//! [`AbortHandle`] is owned by exactly one entry; removing or replacing an
//! entry aborts its timer first. Each entry also carries a generation number
//! so a timer that already woke up can never act on a newer entry.
//!
//! In-flight policy: a user waiting for an image stays in flight for the
//! whole wait. A second command during the wait is answered with "busy", and
//! the marker is cleared when the wait expires.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::message::ChannelMessage;

/// Stable identity of a conversation participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity of a message's sender, scoped by channel type.
    pub fn from_message(message: &ChannelMessage) -> Self {
        Self(format!("{}:{}", message.channel_type_str(), message.user_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Opaque proof of one particular in-flight admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlightToken(u64);

struct PendingWait {
    style: u32,
    expires_at: Instant,
    generation: u64,
    timer: AbortHandle,
}

struct InFlight {
    generation: u64,
    release: Option<AbortHandle>,
}

impl InFlight {
    fn cancel_release(&mut self) {
        if let Some(handle) = self.release.take() {
            handle.abort();
        }
    }
}

#[derive(Default)]
struct RegistryState {
    waits: HashMap<UserId, PendingWait>,
    in_flight: HashMap<UserId, InFlight>,
    next_generation: u64,
    closed: bool,
}

impl RegistryState {
    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn remove_wait(&mut self, user: &UserId) -> Option<PendingWait> {
        let wait = self.waits.remove(user)?;
        wait.timer.abort();
        Some(wait)
    }

    fn remove_in_flight(&mut self, user: &UserId) -> bool {
        match self.in_flight.remove(user) {
            Some(mut entry) => {
                entry.cancel_release();
                true
            }
            None => false,
        }
    }

    fn admit(&mut self, user: &UserId) -> u64 {
        let generation = self.next_generation();
        self.in_flight.insert(
            user.clone(),
            InFlight {
                generation,
                release: None,
            },
        );
        generation
    }
}

/// Process-wide session registry. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin waiting for an image from `user`.
    ///
    /// Replaces (and cancels) any existing wait. The user is marked in flight
    /// if not already. When `ttl` elapses without the wait being consumed or
    /// cleared, the wait and the in-flight marker are removed and
    /// `on_expire` runs exactly once. If the wait is consumed, reset or shut
    /// down first, `on_expire` is dropped without running.
    ///
    /// Returns `false` (and does nothing) once the registry is shut down.
    pub fn begin_wait<F>(&self, user: &UserId, style: u32, ttl: Duration, on_expire: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.lock();
        if state.closed {
            return false;
        }

        if state.remove_wait(user).is_some() {
            tracing::debug!(user = %user, "Replaced pending wait");
        }
        if !state.in_flight.contains_key(user) {
            state.admit(user);
        }

        let generation = state.next_generation();
        let timer = tokio::spawn(expire_wait(
            Arc::clone(&self.state),
            user.clone(),
            generation,
            ttl,
            on_expire,
        ))
        .abort_handle();

        state.waits.insert(
            user.clone(),
            PendingWait {
                style,
                expires_at: Instant::now() + ttl,
                generation,
                timer,
            },
        );

        tracing::debug!(user = %user, style, ttl_secs = ttl.as_secs_f64(), "Waiting for image");
        true
    }

    /// Take the pending wait for `user`, cancelling its timer.
    ///
    /// Of several concurrent callers for the same user, exactly one gets the style.
    pub fn consume_wait(&self, user: &UserId) -> Option<u32> {
        let wait = self.lock().remove_wait(user)?;
        tracing::debug!(user = %user, style = wait.style, "Consumed pending wait");
        Some(wait.style)
    }

    /// Admission gate: mark `user` in flight unless already marked.
    pub fn try_begin_in_flight(&self, user: &UserId) -> bool {
        let mut state = self.lock();
        if state.closed || state.in_flight.contains_key(user) {
            return false;
        }
        state.admit(user);
        true
    }

    /// Remove `user` from the in-flight set. Idempotent.
    pub fn end_in_flight(&self, user: &UserId) {
        if self.lock().remove_in_flight(user) {
            tracing::debug!(user = %user, "Cleared in-flight marker");
        }
    }

    /// Token of the current admission for `user`, if any.
    pub fn in_flight_token(&self, user: &UserId) -> Option<InFlightToken> {
        self.lock()
            .in_flight
            .get(user)
            .map(|entry| InFlightToken(entry.generation))
    }

    /// End the admission identified by `token`; no-op if it was superseded.
    pub fn end_in_flight_token(&self, user: &UserId, token: InFlightToken) {
        let mut state = self.lock();
        if state.in_flight.get(user).map(|e| e.generation) == Some(token.0) {
            state.remove_in_flight(user);
            tracing::debug!(user = %user, "Cleared in-flight marker");
        }
    }

    /// Clear the admission identified by `token` after `delay`.
    ///
    /// Replaces any earlier deferred release for the same admission. The
    /// timer is cancelled if the marker is cleared by other means first.
    pub fn release_in_flight_after(&self, user: &UserId, token: InFlightToken, delay: Duration) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        let Some(entry) = state.in_flight.get_mut(user) else {
            return;
        };
        if entry.generation != token.0 {
            return;
        }

        entry.cancel_release();
        let handle = tokio::spawn(release_later(
            Arc::clone(&self.state),
            user.clone(),
            token.0,
            delay,
        ))
        .abort_handle();
        entry.release = Some(handle);
    }

    /// Clear both the pending wait and the in-flight marker for `user`.
    ///
    /// Returns whether anything was cleared.
    pub fn reset_user(&self, user: &UserId) -> bool {
        let mut state = self.lock();
        let had_wait = state.remove_wait(user).is_some();
        let had_flight = state.remove_in_flight(user);
        if had_wait || had_flight {
            tracing::info!(user = %user, had_wait, had_flight, "Reset user session");
        }
        had_wait || had_flight
    }

    /// Cancel every timer and clear all state. Later operations are no-ops.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.closed = true;

        let waits = state.waits.len();
        let flights = state.in_flight.len();
        for (_, wait) in state.waits.drain() {
            wait.timer.abort();
        }
        for (_, mut entry) in state.in_flight.drain() {
            entry.cancel_release();
        }

        tracing::info!(waits, in_flight = flights, "Session registry shut down");
    }

    pub fn has_pending_wait(&self, user: &UserId) -> bool {
        self.lock().waits.contains_key(user)
    }

    pub fn is_in_flight(&self, user: &UserId) -> bool {
        self.lock().in_flight.contains_key(user)
    }

    /// When the pending wait for `user` expires.
    pub fn wait_deadline(&self, user: &UserId) -> Option<Instant> {
        self.lock().waits.get(user).map(|w| w.expires_at)
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().closed
    }
}

async fn expire_wait<F>(
    state: Arc<Mutex<RegistryState>>,
    user: UserId,
    generation: u64,
    ttl: Duration,
    on_expire: F,
) where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::time::sleep(ttl).await;

    let expired = {
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.waits.get(&user) {
            Some(wait) if wait.generation == generation => {
                // Our own handle; the task is finishing anyway.
                state.waits.remove(&user);
                state.remove_in_flight(&user);
                true
            }
            _ => false,
        }
    };

    if expired {
        tracing::info!(user = %user, "Pending wait expired");
        on_expire.await;
    }
}

async fn release_later(state: Arc<Mutex<RegistryState>>, user: UserId, generation: u64, delay: Duration) {
    tokio::time::sleep(delay).await;

    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    if state.in_flight.get(&user).map(|e| e.generation) == Some(generation) {
        state.in_flight.remove(&user);
        tracing::debug!(user = %user, "Cooldown elapsed, cleared in-flight marker");
    }
}
