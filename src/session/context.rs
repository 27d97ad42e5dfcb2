//! In-memory view of which role slots are authenticated in this tab.
//!
//! Every mutation goes through a named transition that writes the store first
//! and the snapshot second while holding the context lock, so a reader never
//! sees the two disagree because of this tab's own writes. Disagreement caused
//! by other tabs is repaired by [`SessionContext::reconcile`].

use std::{
    collections::BTreeMap,
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{
    client::{Authenticate, CallError},
    origin::OriginKind,
    store::SessionStore,
};
use crate::{
    authority::Credential,
    token::{self, Claims, Role, TokenError},
};

/// A token the client holds, with the claims it could read without the
/// authority secret.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    raw: String,
    claims: Claims,
}

impl SessionToken {
    /// # Errors
    /// Returns [`TokenError::Malformed`] if the claims cannot be read.
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let claims = token::peek(raw)?;
        Ok(Self {
            raw: raw.to_string(),
            claims,
        })
    }

    /// Token usable in `slot`, or `None` if it is malformed or was minted for
    /// another role.
    #[must_use]
    pub fn for_slot(slot: Role, raw: &str) -> Option<Self> {
        Self::parse(raw).ok().filter(|token| token.role() == slot)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.claims.role
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.claims.sub
    }

    #[must_use]
    pub const fn issued_at(&self) -> i64 {
        self.claims.iat
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("role", &self.claims.role)
            .field("subject", &self.claims.sub)
            .field("issued_at", &self.claims.iat)
            .finish_non_exhaustive()
    }
}

/// Immutable copy of the authenticated slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    slots: BTreeMap<Role, SessionToken>,
}

impl Snapshot {
    #[must_use]
    pub fn token(&self, role: Role) -> Option<&SessionToken> {
        self.slots.get(&role)
    }

    #[must_use]
    pub fn is_authenticated(&self, role: Role) -> bool {
        self.slots.contains_key(&role)
    }

    pub fn authenticated(&self) -> impl Iterator<Item = Role> + '_ {
        self.slots.keys().copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The slot whose routes this origin shows. When several served slots are
    /// populated the most recently issued token wins; a tie goes to the slot
    /// listed first by [`OriginKind::served_slots`].
    #[must_use]
    pub fn active_role(&self, origin: OriginKind) -> Option<Role> {
        origin
            .served_slots()
            .iter()
            .enumerate()
            .filter_map(|(priority, role)| {
                self.token(*role)
                    .map(|token| (token.issued_at(), std::cmp::Reverse(priority), *role))
            })
            .max()
            .map(|(_, _, role)| role)
    }

    /// Copy with `token` placed in its slot.
    #[must_use]
    pub fn with(mut self, token: SessionToken) -> Self {
        self.slots.insert(token.role(), token);
        self
    }
}

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub adopted: Vec<Role>,
    pub replaced: Vec<Role>,
    pub cleared: Vec<Role>,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adopted.is_empty() && self.replaced.is_empty() && self.cleared.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextStats {
    pub logins: u64,
    pub handoffs: u64,
    pub logouts: u64,
    pub clears: u64,
    pub rejections: u64,
    pub reconciliations: u64,
    pub adopted: u64,
    pub replaced: u64,
    pub cleared: u64,
}

#[derive(Debug, Default)]
struct Counters {
    logins: AtomicU64,
    handoffs: AtomicU64,
    logouts: AtomicU64,
    clears: AtomicU64,
    rejections: AtomicU64,
    reconciliations: AtomicU64,
    adopted: AtomicU64,
    replaced: AtomicU64,
    cleared: AtomicU64,
}

fn bump(counter: &AtomicU64, by: usize) {
    counter.fetch_add(u64::try_from(by).unwrap_or(u64::MAX), Ordering::Relaxed);
}

#[derive(Debug, Default)]
struct State {
    snapshot: Snapshot,
    /// Incremented on every change to a slot; in-flight calls compare it to
    /// decide whether their response still applies.
    generations: BTreeMap<Role, u64>,
}

impl State {
    fn generation(&self, role: Role) -> u64 {
        self.generations.get(&role).copied().unwrap_or_default()
    }

    fn set(&mut self, token: SessionToken) {
        let role = token.role();
        self.snapshot.slots.insert(role, token);
        *self.generations.entry(role).or_default() += 1;
    }

    fn remove(&mut self, role: Role) -> bool {
        let removed = self.snapshot.slots.remove(&role).is_some();
        if removed {
            *self.generations.entry(role).or_default() += 1;
        }
        removed
    }
}

struct Inner {
    origin: OriginKind,
    store: SessionStore,
    state: Mutex<State>,
    updates: watch::Sender<Snapshot>,
    counters: Counters,
}

/// Shared handle to one tab's session state.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<Inner>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("origin", &self.inner.origin)
            .field("tab", &self.inner.store.tab())
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl SessionContext {
    /// Context hydrated from whatever the store already holds.
    #[must_use]
    pub fn new(origin: OriginKind, store: SessionStore) -> Self {
        let (updates, _) = watch::channel(Snapshot::default());
        let context = Self {
            inner: Arc::new(Inner {
                origin,
                store,
                state: Mutex::new(State::default()),
                updates,
                counters: Counters::default(),
            }),
        };
        let report = context.sync_from_store();
        debug!(origin = ?origin, adopted = ?report.adopted, "Hydrated session context");
        context
    }

    #[must_use]
    pub fn origin(&self) -> OriginKind {
        self.inner.origin
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot.clone()
    }

    /// Receiver that observes every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.inner.updates.subscribe()
    }

    #[must_use]
    pub fn active_role(&self) -> Option<Role> {
        self.lock().snapshot.active_role(self.inner.origin)
    }

    #[must_use]
    pub fn generation(&self, role: Role) -> u64 {
        self.lock().generation(role)
    }

    #[must_use]
    pub fn stats(&self) -> ContextStats {
        let counters = &self.inner.counters;
        ContextStats {
            logins: counters.logins.load(Ordering::Relaxed),
            handoffs: counters.handoffs.load(Ordering::Relaxed),
            logouts: counters.logouts.load(Ordering::Relaxed),
            clears: counters.clears.load(Ordering::Relaxed),
            rejections: counters.rejections.load(Ordering::Relaxed),
            reconciliations: counters.reconciliations.load(Ordering::Relaxed),
            adopted: counters.adopted.load(Ordering::Relaxed),
            replaced: counters.replaced.load(Ordering::Relaxed),
            cleared: counters.cleared.load(Ordering::Relaxed),
        }
    }

    /// Authenticate `role` against the authority and make it the active slot.
    ///
    /// # Errors
    /// Returns the authority's error unchanged, [`CallError::Superseded`] if
    /// the slot changed while the request was in flight, or a store error.
    pub async fn login<A: Authenticate>(
        &self,
        authority: &A,
        role: Role,
        credential: &Credential,
    ) -> Result<(), CallError> {
        if !self.inner.origin.serves(role) {
            return Err(CallError::NotServed(role));
        }
        let generation = self.generation(role);
        let raw = authority.authenticate(role, credential).await?;
        let token = SessionToken::for_slot(role, &raw).ok_or(CallError::MalformedToken)?;

        let mut state = self.lock();
        if state.generation(role) != generation {
            warn!(role = %role, "Slot changed during login, discarding token");
            return Err(CallError::Superseded(role));
        }
        self.establish(&mut state, token)?;
        bump(&self.inner.counters.logins, 1);
        info!(role = %role, tab = %self.inner.store.tab(), "Logged in");
        Ok(())
    }

    /// Adopt a token delivered by a handoff URL.
    ///
    /// # Errors
    /// Returns [`CallError::NotServed`] for a slot this origin does not hold,
    /// or a store error.
    pub fn handoff_consumed(&self, token: SessionToken) -> Result<(), CallError> {
        let role = token.role();
        if !self.inner.origin.serves(role) {
            return Err(CallError::NotServed(role));
        }
        let mut state = self.lock();
        self.establish(&mut state, token)?;
        bump(&self.inner.counters.handoffs, 1);
        info!(role = %role, tab = %self.inner.store.tab(), "Handoff consumed");
        Ok(())
    }

    /// End the active slot's session. Other slots are untouched.
    ///
    /// # Errors
    /// Returns a store error if the slot could not be cleared.
    pub fn logout(&self) -> Result<Option<Role>, CallError> {
        let mut state = self.lock();
        let Some(role) = state.snapshot.active_role(self.inner.origin) else {
            return Ok(None);
        };
        self.inner.store.clear(role)?;
        state.remove(role);
        self.publish(&state);
        bump(&self.inner.counters.logouts, 1);
        info!(role = %role, tab = %self.inner.store.tab(), "Logged out");
        Ok(Some(role))
    }

    /// Explicit clear: empty every slot key in the store, then the snapshot.
    /// Returns the slots this tab was holding.
    ///
    /// # Errors
    /// Returns the first store error; the snapshot is left as it was.
    pub fn clear_all(&self) -> Result<Vec<Role>, CallError> {
        let mut state = self.lock();
        self.inner.store.clear_all()?;
        let cleared: Vec<Role> = self
            .inner
            .origin
            .served_slots()
            .iter()
            .copied()
            .filter(|&slot| state.remove(slot))
            .collect();
        self.publish(&state);
        bump(&self.inner.counters.clears, 1);
        info!(cleared = ?cleared, tab = %self.inner.store.tab(), "Cleared session");
        Ok(cleared)
    }

    /// Drop a slot the authority refused.
    ///
    /// # Errors
    /// Returns a store error if the slot could not be cleared.
    pub fn server_rejected(&self, role: Role) -> Result<(), CallError> {
        let mut state = self.lock();
        self.clear_rejected(&mut state, role)
    }

    /// Run a protected call with the token in `role`'s slot.
    ///
    /// A rejection clears the slot only if the slot still holds the token the
    /// call was made with. A successful response that arrives after the slot
    /// changed is reported as [`CallError::Superseded`].
    ///
    /// # Errors
    /// Returns [`CallError::NotAuthenticated`] when the slot is empty, or the
    /// request's own error.
    pub async fn call<T, F, Fut>(&self, role: Role, request: F) -> Result<T, CallError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let (raw, generation) = {
            let state = self.lock();
            let token = state
                .snapshot
                .token(role)
                .ok_or(CallError::NotAuthenticated(role))?;
            (token.raw.clone(), state.generation(role))
        };

        let result = request(raw).await;

        let mut state = self.lock();
        if state.generation(role) != generation {
            debug!(role = %role, "Ignoring response for a replaced session");
            return Err(CallError::Superseded(role));
        }
        if let Err(CallError::Rejected(reason)) = &result {
            warn!(role = %role, %reason, "Authority rejected session");
            self.clear_rejected(&mut state, role)?;
        }
        result
    }

    /// Converge the snapshot with the store: adopt tokens written by other
    /// tabs, replace tokens that changed and drop slots cleared elsewhere.
    /// Running it twice in a row never changes anything the second time.
    pub fn reconcile(&self) -> ReconcileReport {
        let report = self.sync_from_store();
        let counters = &self.inner.counters;
        bump(&counters.reconciliations, 1);
        bump(&counters.adopted, report.adopted.len());
        bump(&counters.replaced, report.replaced.len());
        bump(&counters.cleared, report.cleared.len());
        if !report.is_empty() {
            info!(
                tab = %self.inner.store.tab(),
                adopted = ?report.adopted,
                replaced = ?report.replaced,
                cleared = ?report.cleared,
                "Reconciled session with store"
            );
        }
        report
    }

    fn sync_from_store(&self) -> ReconcileReport {
        let mut state = self.lock();
        let mut report = ReconcileReport::default();
        for &slot in self.inner.origin.served_slots() {
            let stored = self
                .inner
                .store
                .get(slot)
                .and_then(|raw| SessionToken::for_slot(slot, &raw));
            let current = state.snapshot.token(slot).map(|token| token.raw.clone());
            match (stored, current) {
                (Some(stored), None) => {
                    state.set(stored);
                    report.adopted.push(slot);
                }
                (Some(stored), Some(current)) if stored.raw != current => {
                    state.set(stored);
                    report.replaced.push(slot);
                }
                (None, Some(_)) => {
                    state.remove(slot);
                    report.cleared.push(slot);
                }
                _ => {}
            }
        }
        if !report.is_empty() {
            self.publish(&state);
        }
        report
    }

    /// Store first, then snapshot. Sibling console slots are cleared so only
    /// one console role is ever held at a time by this tab's own doing.
    fn establish(&self, state: &mut State, token: SessionToken) -> Result<(), CallError> {
        let role = token.role();
        self.inner.store.set(role, token.as_str())?;
        for sibling in self.inner.origin.exclusive_with(role) {
            self.inner.store.clear(sibling)?;
            state.remove(sibling);
        }
        state.set(token);
        self.publish(state);
        Ok(())
    }

    fn clear_rejected(&self, state: &mut State, role: Role) -> Result<(), CallError> {
        self.inner.store.clear(role)?;
        if state.remove(role) {
            self.publish(state);
        }
        bump(&self.inner.counters.rejections, 1);
        Ok(())
    }

    fn publish(&self, state: &State) {
        self.inner.updates.send_replace(state.snapshot.clone());
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
