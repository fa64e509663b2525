//! COMPASS hook handler: injects coordination context into prompts, gates
//! tool calls until a coordinated session is running, keeps stray files out
//! of the project root and tracks estimated token usage per agent.

/// Safely truncate a UTF-8 string to a maximum number of characters
pub fn truncate_utf8_safe(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", truncated)
    }
}

pub mod compass;
pub mod config;
pub mod error;
pub mod handler;
pub mod hook;
pub mod logging;
pub mod paths;
pub mod policy;
pub mod session;
pub mod status;
pub mod storage;
pub mod tokens;
pub mod validation_constants;

pub use compass::Compass;
pub use config::{load_config, CompassConfig};
pub use error::CompassError;
pub use handler::{handle_event, handle_event_at};
pub use hook::{read_event, HookEvent, HookInput, HookOutput};
pub use policy::{Decision, Permission, PolicyContext, PolicyEngine};
pub use session::SessionOracle;
pub use tokens::{TokenEstimator, TokenLedger, TokenReport};
