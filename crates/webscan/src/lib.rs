//! Web-facing collaborators: the liveness fallback probe and the web scanner.

mod liveness;
mod rules;
mod scanner;

pub use liveness::{WebProbe, TOP_WEB_PORTS};
pub use rules::{FingerRule, FingerRules};
pub use scanner::{HttpWebScanner, WebOptions};
