//! Usage governor: multi-window rate limiting, prepaid credit balances,
//! local/remote replica reconciliation, and paced outbound calls.
//!
//! The governor owns one mutable usage record per identity. Callers gate
//! work with [`UsageGovernor::check_limit`], record it with
//! [`UsageGovernor::track_call`] / [`UsageGovernor::consume_credit`], and
//! observe threshold crossings through the broadcast event stream. Outbound
//! calls to the rate-limited upstream go through a single serial pacing
//! lane via [`UsageGovernor::submit`].

pub mod alerts;
pub mod cache;
pub mod config;
pub mod errors;
pub mod governor;
pub mod identity;
pub mod ledger;
pub mod limits;
pub mod queue;
pub mod record;
pub mod remote;
pub mod replica;
pub mod sync;

pub use alerts::{AlertEmitter, UsageEvent};
pub use cache::{FileCache, LocalCache, MemoryCache};
pub use config::{GovernorConfig, LimitsTable};
pub use errors::GovernorError;
pub use governor::UsageGovernor;
pub use identity::Identity;
pub use ledger::CreditKind;
pub use limits::Scope;
pub use queue::RequestQueue;
pub use record::UsageRecord;
pub use remote::{MemoryRemote, RemoteStore};
pub use sync::SyncHandle;
