//! Client half: what each tab of an origin does to keep its session view in
//! line with the shared store, other tabs and the authority.

pub mod client;
pub mod context;
pub mod guard;
pub mod handoff;
pub mod history;
pub mod origin;
pub mod reconcile;
pub mod store;
pub mod tab;

pub use client::{Authenticate, CallError, HttpAuthority};
pub use context::{ContextStats, ReconcileReport, SessionContext, SessionToken, Snapshot};
pub use guard::{GuardDecision, RouterGuard};
pub use handoff::{HandoffDecoder, HandoffEnvelope, HandoffError, HandoffOutcome};
pub use origin::{OriginConfig, OriginKind};
pub use reconcile::{ReconcileConfig, ReconcilerHandle};
pub use store::{OriginStorage, SessionStore, StorageEvent, StoreError, TabId};
pub use tab::{LoginOutcome, Tab};
