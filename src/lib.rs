//! # keyrange_search
//!
//! Exhaustive, pausable search of a private-key scalar range for the key
//! whose Bitcoin P2PKH address equals a target.
//!
//! ## Architecture
//!
//! - `crypto`: Scalar to address derivation and key export
//! - `matcher`: Byte-exact target matching
//! - `partition`: Key ranges and lock-free chunk hand-out
//! - `worker`: Worker threads, control signal and match slot
//! - `reporter`: Progress aggregation and throttling
//! - `controller`: Run state machine and coordination
//! - `events`: Event sink implemented by the host
//! - `config`: Engine settings and command line

pub mod config;
pub mod controller;
pub mod crypto;
pub mod events;
pub mod matcher;
pub mod partition;
pub mod reporter;
pub mod worker;

pub use config::{Config, ConfigError, EngineSettings};
pub use controller::{FinishReason, RunOutcome, RunState, SearchController, SearchError};
pub use crypto::{derive_address, AddressDerivation, AddressFormat, DeriveError, P2pkhDerivation};
pub use events::{EventSink, SearchEvent};
pub use matcher::Target;
pub use partition::{Chunk, KeyRange, Partitioner};
pub use reporter::ProgressSnapshot;
pub use worker::MatchResult;
