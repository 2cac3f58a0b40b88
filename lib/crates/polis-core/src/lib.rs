//! Human-in-the-loop approval core: OTT minting, REQMOD/RESPMOD body
//! rewriting, DLP content inspection, and the state-store commit sequences
//! that back them.

pub mod audit;
pub mod conn;
pub mod config;
pub mod dlp;
pub mod domain;
pub mod error;
pub mod hooks;
pub mod mint;
pub mod reqmod;
pub mod respmod;
pub mod store;

pub use conn::ManagedConnection;
pub use config::CoreConfig;
pub use error::{CoreError, CoreResult};
pub use hooks::{HookHandler, IcapCoreHandler, NoopHookHandler};
pub use mint::{mint_ott, EntropySource, OsEntropySource};
pub use store::{MockStateStore, RedisStateStore, StateStore};
