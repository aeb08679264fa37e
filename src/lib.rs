#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]

//! tunnelctl library: tmux-backed SSH tunnels and a managed SOCKS proxy.
//!
//! - `mux`: tmux session gateway and session naming
//! - `probe`: local port listening checks with bounded retry
//! - `registry`: persisted active-tunnel list reconciled against tmux
//! - `recent`: most-recently-used tunnel parameters
//! - `proxy`: managed proxy slot, config catalog, system proxy toggle
//! - `hosts`: host aliases from `~/.ssh/config`
//! - `store`: key-value persistence
//! - `config`: configuration loading
//! - `state`: wiring of the concrete collaborators

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod hosts;
pub mod mux;
pub mod probe;
pub mod proxy;
pub mod recent;
pub mod registry;
pub mod shell;
pub mod state;
pub mod store;
pub mod util;

#[cfg(test)]
mod testing;

// Re-export key types at crate root for convenience.
pub use config::Config;
pub use error::{ErrorCategory, Result, TunnelError};
pub use proxy::{EnableOutcome, ManagedProxyController, ProxyState};
pub use registry::{Tunnel, TunnelRegistry};
pub use state::AppState;
