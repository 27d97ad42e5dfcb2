//! One open tab of an origin: its history, session context, handoff decoder,
//! router guard and reconciliation loop, wired in page-load order.

use std::future::Future;
use tracing::{debug, info};
use url::Url;

use super::{
    client::{Authenticate, CallError},
    context::SessionContext,
    guard::{GuardDecision, RouterGuard, LOGIN_PATH},
    handoff::{self, HandoffDecoder, HandoffEnvelope, HandoffOutcome},
    history::BrowserHistory,
    origin::{OriginConfig, OriginKind},
    reconcile::{self, ReconcileConfig, ReconcilerHandle},
    store::{OriginStorage, TabId},
};
use crate::{authority::Credential, token::Role};

/// Result of a login started from this tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The role lives on this origin; the tab now shows `home`.
    Landed(&'static str),
    /// The role lives on another origin; navigate the browser here.
    Handoff(Url),
}

#[derive(Debug)]
pub struct Tab {
    origin: OriginKind,
    context: SessionContext,
    history: BrowserHistory,
    guard: RouterGuard,
    decoder: HandoffDecoder,
    handoff: HandoffOutcome,
    reconciler: Option<ReconcilerHandle>,
}

impl Tab {
    /// Load `location` in a new tab. Must be called inside a tokio runtime.
    ///
    /// The context is hydrated before the handoff decoder runs, and the
    /// reconciler starts only after the decoder so a handoff token is never
    /// raced by a stale store read.
    #[must_use]
    pub fn open(
        origin: OriginKind,
        storage: &OriginStorage,
        location: Url,
        config: ReconcileConfig,
    ) -> Self {
        let store = storage.store_for(TabId::new());
        let events = store.subscribe();
        let context = SessionContext::new(origin, store);
        let mut history = BrowserHistory::new(location);
        let decoder = HandoffDecoder::new(origin);
        let handoff = decoder.run(&mut history, &context);
        let reconciler = reconcile::spawn(context.clone(), events, config);

        let mut tab = Self {
            origin,
            context,
            history,
            guard: RouterGuard::new(origin),
            decoder,
            handoff,
            reconciler: Some(reconciler),
        };
        tab.sync_route();
        info!(origin = ?origin, tab = %tab.id(), location = %tab.location(), "Opened tab");
        tab
    }

    #[must_use]
    pub fn id(&self) -> TabId {
        self.context.store().tab()
    }

    #[must_use]
    pub const fn origin(&self) -> OriginKind {
        self.origin
    }

    #[must_use]
    pub const fn context(&self) -> &SessionContext {
        &self.context
    }

    #[must_use]
    pub fn location(&self) -> &Url {
        self.history.current()
    }

    #[must_use]
    pub const fn history(&self) -> &BrowserHistory {
        &self.history
    }

    /// What the decoder did when the page loaded.
    #[must_use]
    pub const fn handoff(&self) -> &HandoffOutcome {
        &self.handoff
    }

    /// Run the decoder again on the current entry. Always a no-op after the
    /// first run of a page load.
    pub fn rerun_handoff(&mut self) -> HandoffOutcome {
        self.decoder.run(&mut self.history, &self.context)
    }

    /// Navigate to `path`, following the guard's redirect if the route is
    /// not reachable.
    pub fn navigate(&mut self, path: &str) -> GuardDecision {
        let decision = self.guard.check(&self.context.snapshot(), path);
        let target = match decision {
            GuardDecision::Allow => path,
            GuardDecision::Redirect(to) => to,
        };
        let url = self.history.resolve(target);
        self.history.push(url);
        decision
    }

    /// Re-apply the guard to the current location, e.g. after reconciliation
    /// changed the active role.
    pub fn sync_route(&mut self) -> GuardDecision {
        let decision = self
            .guard
            .check(&self.context.snapshot(), self.history.current().path());
        if let GuardDecision::Redirect(to) = decision {
            debug!(tab = %self.id(), to, "Guard redirect");
            let url = self.history.resolve(to);
            self.history.replace(url);
        }
        decision
    }

    pub fn back(&mut self) -> GuardDecision {
        self.history.back();
        self.sync_route()
    }

    /// Log in for `role`. Roles held by this origin land here; others are
    /// handed off to their own origin with the freshly issued token.
    ///
    /// # Errors
    /// Returns the authority's error; nothing changes in that case.
    pub async fn login<A: Authenticate>(
        &mut self,
        authority: &A,
        origins: &OriginConfig,
        role: Role,
        credential: &Credential,
    ) -> Result<LoginOutcome, CallError> {
        if self.origin.serves(role) {
            self.context.login(authority, role, credential).await?;
            let home = self.guard.landing(&self.context.snapshot());
            let url = self.history.resolve(home);
            self.history.replace(url);
            return Ok(LoginOutcome::Landed(home));
        }

        let token = authority.authenticate(role, credential).await?;
        debug!(
            tab = %self.id(),
            role = %role,
            to = ?OriginKind::for_role(role),
            "Handing off"
        );
        let envelope = HandoffEnvelope { token, role };
        Ok(LoginOutcome::Handoff(handoff::encode(
            origins.destination(role),
            &envelope,
        )))
    }

    /// End the active session and land on the login route, even if another
    /// slot of this origin is still held.
    ///
    /// # Errors
    /// Returns a store error if the slot could not be cleared.
    pub fn logout(&mut self) -> Result<Option<Role>, CallError> {
        let role = self.context.logout()?;
        self.land_on_login();
        Ok(role)
    }

    /// Explicit clear: drop every slot in this origin's store and land on
    /// the login route.
    ///
    /// # Errors
    /// Returns a store error; the snapshot and location are left as they were.
    pub fn clear_session(&mut self) -> Result<Vec<Role>, CallError> {
        let cleared = self.context.clear_all()?;
        self.land_on_login();
        Ok(cleared)
    }

    fn land_on_login(&mut self) {
        let url = self.history.resolve(LOGIN_PATH);
        self.history.push(url);
    }

    /// Protected call with this tab's `role` token. A rejection sends the tab
    /// back through the guard.
    ///
    /// # Errors
    /// See [`SessionContext::call`].
    pub async fn call<T, F, Fut>(&mut self, role: Role, request: F) -> Result<T, CallError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let result = self.context.call(role, request).await;
        if matches!(result, Err(CallError::Rejected(_))) {
            self.sync_route();
        }
        result
    }

    /// Stop the reconciler and wait for it.
    pub async fn close(mut self) {
        if let Some(reconciler) = self.reconciler.take() {
            reconciler.shutdown().await;
        }
        debug!(tab = %self.id(), stats = ?self.context.stats(), "Closed tab");
    }
}
