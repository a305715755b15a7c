use std::io::{BufRead, Write};

use serde_json::json;

use crate::util::{eprint_json, exit_code_for, print_json, raw_api_request};

/// Send one message, or run an interactive session when `message` is None.
pub async fn run(api_url: &str, user_id: &str, message: Option<String>, raw: bool) -> i32 {
    match message {
        Some(m) => send(api_url, user_id, &m, raw).await,
        None => repl(api_url, user_id, raw).await,
    }
}

async fn send(api_url: &str, user_id: &str, message: &str, raw: bool) -> i32 {
    let body = json!({
        "user_id": user_id,
        "message": message,
    });
    match raw_api_request(api_url, reqwest::Method::POST, &["v1", "chat"], Some(body)).await {
        Ok((status, body)) => {
            let code = exit_code_for(status);
            if code != 0 {
                eprint_json(&body);
            } else if raw {
                print_json(&body, true);
            } else {
                println!("{}", reply_text(&body));
            }
            code
        }
        Err(err) => {
            eprint_json(&err);
            3
        }
    }
}

async fn repl(api_url: &str, user_id: &str, raw: bool) -> i32 {
    println!("Study session for {user_id}. Type 'quit' to leave.");
    let stdin = std::io::stdin();
    let mut last = 0;
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprint_json(&json!({
                    "error": "cli_error",
                    "message": format!("Failed to read stdin: {e}")
                }));
                return 4;
            }
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input.to_lowercase().as_str(), "quit" | "exit") {
            break;
        }

        last = send(api_url, user_id, input, raw).await;
        if last == 3 {
            return last;
        }
        println!();
    }
    last
}

fn reply_text(body: &serde_json::Value) -> String {
    body.get("response")
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_text_prefers_response_field() {
        let body = json!({"response": "Hello!", "metadata": {"intent": "general_chat"}});
        assert_eq!(reply_text(&body), "Hello!");
    }

    #[test]
    fn reply_text_falls_back_to_raw_body() {
        let body = json!({"unexpected": true});
        assert_eq!(reply_text(&body), r#"{"unexpected":true}"#);
    }
}
