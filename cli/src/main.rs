use clap::{Parser, Subcommand};

mod commands;
mod util;

use commands::assessment::{AnswerLength, QuestionKind};
use commands::profile::ProfileCommands;
use commands::topics::TopicCommands;
use util::exit_error;

#[derive(Parser)]
#[command(name = "tutor", version, about = "Study tutor CLI: chat, topics and assessments")]
struct Cli {
    /// API base URL
    #[arg(long, env = "TUTOR_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Learner whose profile the command works on
    #[arg(long, env = "TUTOR_USER_ID")]
    user_id: Option<String>,

    /// Print compact JSON instead of pretty output
    #[arg(long, global = true)]
    raw: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Talk to the tutor (interactive when no message is given)
    Chat {
        /// Message to send
        message: Option<String>,
    },
    /// Profile summary, history, export and reset
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Topic registry
    Topics {
        #[command(subcommand)]
        command: TopicCommands,
    },
    /// Request a question on a topic
    Question {
        /// Topic name
        topic: String,
        #[arg(long, value_enum, default_value = "mcq")]
        kind: QuestionKind,
        /// Expected answer length (qna only)
        #[arg(long, value_enum)]
        length: Option<AnswerLength>,
    },
    /// Answer the pending question on a topic
    Answer {
        /// Topic name
        topic: String,
        #[arg(long, value_enum, default_value = "mcq")]
        kind: QuestionKind,
        /// Option letter for mcq, free text for qna
        answer: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let raw = cli.raw;

    let code = match cli.command {
        Commands::Health => commands::health::run(&cli.api_url, raw).await,
        command => {
            let user_id = cli.user_id.unwrap_or_else(|| {
                exit_error(
                    "user_id is required for profile operations",
                    Some("Set --user-id or TUTOR_USER_ID env var"),
                );
            });
            run_for_user(&cli.api_url, &user_id, command, raw).await
        }
    };

    std::process::exit(code);
}

async fn run_for_user(api_url: &str, user_id: &str, command: Commands, raw: bool) -> i32 {
    match command {
        Commands::Health => commands::health::run(api_url, raw).await,
        Commands::Chat { message } => commands::chat::run(api_url, user_id, message, raw).await,
        Commands::Profile { command } => {
            commands::profile::run(api_url, user_id, command, raw).await
        }
        Commands::Topics { command } => commands::topics::run(api_url, user_id, command, raw).await,
        Commands::Question {
            topic,
            kind,
            length,
        } => commands::assessment::question(api_url, user_id, &topic, kind, length, raw).await,
        Commands::Answer {
            topic,
            kind,
            answer,
        } => commands::assessment::answer(api_url, user_id, &topic, kind, &answer, raw).await,
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn answer_parses_kind_and_text() {
        let cli = Cli::try_parse_from([
            "tutor",
            "--user-id",
            "u1",
            "answer",
            "Photosynthesis",
            "--kind",
            "qna",
            "Plants turn light into sugar",
        ])
        .expect("valid invocation");
        assert_eq!(cli.user_id.as_deref(), Some("u1"));
        match cli.command {
            Commands::Answer { topic, kind, answer } => {
                assert_eq!(topic, "Photosynthesis");
                assert!(matches!(kind, QuestionKind::Qna));
                assert_eq!(answer, "Plants turn light into sugar");
            }
            _ => panic!("expected answer command"),
        }
    }

    #[test]
    fn profile_reset_parses_confirmation() {
        let cli = Cli::try_parse_from(["tutor", "profile", "reset", "--yes"])
            .expect("valid invocation");
        assert!(matches!(
            cli.command,
            Commands::Profile {
                command: ProfileCommands::Reset { yes: true }
            }
        ));
    }

    #[test]
    fn clear_history_is_a_profile_subcommand() {
        let cli = Cli::try_parse_from(["tutor", "profile", "clear-history"])
            .expect("valid invocation");
        assert!(matches!(
            cli.command,
            Commands::Profile {
                command: ProfileCommands::ClearHistory
            }
        ));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(Cli::try_parse_from(["tutor", "question", "Biology", "--kind", "essay"]).is_err());
    }
}
