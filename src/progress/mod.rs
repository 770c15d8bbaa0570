//! Live progress derived from the unstructured output of external tools.

mod extract;
mod tail;

pub use extract::extract_percent;
pub use tail::{DEFAULT_POLL_INTERVAL, TailMonitor};
