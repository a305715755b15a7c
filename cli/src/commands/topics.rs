use clap::Subcommand;
use serde_json::json;

use crate::util::api_request;

#[derive(Subcommand)]
pub enum TopicCommands {
    /// List all topics with their classification
    List,
    /// Register a topic (no-op when it already exists)
    Add {
        /// Topic name (3-50 chars: letters, digits, spaces, '-', '&')
        name: String,
        /// Parent topic name
        #[arg(long)]
        parent: Option<String>,
        /// Short summary of what was explained
        #[arg(long)]
        summary: Option<String>,
    },
    /// Change a topic's parent or summary
    Update {
        /// Topic name (matched case-insensitively)
        name: String,
        /// New parent topic name (empty string clears it)
        #[arg(long)]
        parent: Option<String>,
        /// New explanation summary
        #[arg(long)]
        summary: Option<String>,
    },
}

pub async fn run(api_url: &str, user_id: &str, command: TopicCommands, raw: bool) -> i32 {
    match command {
        TopicCommands::List => {
            api_request(
                api_url,
                reqwest::Method::GET,
                &["v1", "users", user_id, "topics"],
                None,
                raw,
            )
            .await
        }
        TopicCommands::Add {
            name,
            parent,
            summary,
        } => {
            let mut body = json!({ "name": name });
            if let Some(p) = parent {
                body["parent_topic_id"] = json!(p);
            }
            if let Some(s) = summary {
                body["explanation_summary"] = json!(s);
            }
            api_request(
                api_url,
                reqwest::Method::POST,
                &["v1", "users", user_id, "topics"],
                Some(body),
                raw,
            )
            .await
        }
        TopicCommands::Update {
            name,
            parent,
            summary,
        } => {
            let mut body = json!({});
            if let Some(p) = parent {
                body["parent_topic_id"] = json!(p);
            }
            if let Some(s) = summary {
                body["explanation_summary"] = json!(s);
            }
            api_request(
                api_url,
                reqwest::Method::PATCH,
                &["v1", "users", user_id, "topics", &name],
                Some(body),
                raw,
            )
            .await
        }
    }
}
