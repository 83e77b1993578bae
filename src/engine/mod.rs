//! Classification-engine side: the shared rule store, the packet matcher and
//! the control endpoint that feeds the store.

pub mod config;
pub mod matcher;
pub mod server;
pub mod store;

pub use config::{Disposition, DispositionPolicy, EngineConfig};
pub use matcher::{rule_matches, Matcher, Packet, Verdict};
pub use store::{RuleStore, Snapshot};
