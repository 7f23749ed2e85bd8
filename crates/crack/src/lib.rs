//! Credential testing: the plugin contract, the protocol registry, the
//! bounded engine and the built-in protocol plugins.

mod credentials;
mod engine;
mod net;
mod plugin;
pub mod plugins;
mod registry;

pub use credentials::{default_credentials, load_credentials, pair};
pub use engine::{CrackEngine, CrackOptions, CrackReport, StopHandle};
pub use plugin::{Attempt, CrackPlugin, Endpoint};
pub use registry::{filter_modules, PluginRegistry};
