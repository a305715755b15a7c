use clap::Subcommand;

use crate::util::api_request;

#[derive(Subcommand)]
pub enum ProfileCommands {
    /// Knowledge summary: level, strong/weak areas and topic listing
    Show,
    /// Recent conversation messages
    History,
    /// Start a new session: clear the conversation, keep topics and progress
    ClearHistory,
    /// Full stored profile document as JSON
    Export,
    /// Replace the profile with a fresh one
    Reset {
        /// Confirm the reset (the stored profile is discarded)
        #[arg(long)]
        yes: bool,
    },
}

pub async fn run(api_url: &str, user_id: &str, command: ProfileCommands, raw: bool) -> i32 {
    let (method, path) = match command {
        ProfileCommands::Show => (reqwest::Method::GET, vec!["profile"]),
        ProfileCommands::History => (reqwest::Method::GET, vec!["history"]),
        ProfileCommands::ClearHistory => (reqwest::Method::POST, vec!["history", "clear"]),
        ProfileCommands::Export => (reqwest::Method::GET, vec!["export"]),
        ProfileCommands::Reset { yes } => {
            if !yes {
                let err = serde_json::json!({
                    "error": "usage_error",
                    "message": "Reset discards the stored profile",
                    "docs_hint": "Re-run with --yes to confirm"
                });
                crate::util::eprint_json(&err);
                return 4;
            }
            (reqwest::Method::POST, vec!["reset"])
        }
    };

    let mut segments = vec!["v1", "users", user_id];
    segments.extend(path);
    api_request(api_url, method, &segments, None, raw).await
}
