//! The queue library is responsible for all job operations: putting, reserving, releasing,
//! burying, kicking, pausing, etc etc. Jobs live in memory only.
//!
//! Every tube runs its own scheduling task which owns all of that tube's jobs, so tubes never
//! contend with each other and nothing inside a tube needs locking. The [`Broker`] is the
//! entry point: it finds (or creates) tubes and routes operations to them.
//!
//! This library does not track connections. Callers identify themselves with a
//! [`ClientID`](job::ClientID), which is how reservations are tied to whoever made them.

mod buried;
pub mod broker;
pub mod config;
mod delayed;
pub mod error;
mod heap;
pub mod ids;
pub mod job;
mod ready;
pub mod reserve;
mod reserved;
pub mod tube;

pub use broker::{Broker, BrokerMetrics};
pub use config::{BrokerConfig, BrokerConfigBuilder};
pub use reserve::ReserveOutcome;
pub use tube::{PeekKind, TubeMetrics};
