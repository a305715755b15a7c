use serde_json::json;

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

fn render(value: &serde_json::Value, raw: bool) -> String {
    let rendered = if raw {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    };
    rendered.unwrap_or_else(|_| value.to_string())
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", render(&err, false));
    std::process::exit(1);
}

/// Build `{api_url}/seg/seg/...`, percent-encoding each segment.
pub fn endpoint(api_url: &str, segments: &[&str]) -> Result<reqwest::Url, String> {
    let mut url =
        reqwest::Url::parse(api_url).map_err(|e| format!("Invalid URL: {api_url}: {e}"))?;
    url.path_segments_mut()
        .map_err(|_| format!("Invalid URL: {api_url} cannot be a base"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Execute an API request, print response, exit with structured code.
///
/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error, 4=usage error
pub async fn api_request(
    api_url: &str,
    method: reqwest::Method,
    segments: &[&str],
    body: Option<serde_json::Value>,
    raw: bool,
) -> i32 {
    let url = match endpoint(api_url, segments) {
        Ok(u) => u,
        Err(message) => {
            let err = json!({
                "error": "cli_error",
                "message": message
            });
            eprintln!("{}", render(&err, false));
            return 4;
        }
    };

    let mut req = client().request(method, url);
    if let Some(b) = body {
        req = req.json(&b);
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            let err = connection_error(&e);
            eprintln!("{}", render(&err, false));
            return 3;
        }
    };

    let status = resp.status().as_u16();
    let exit_code = exit_code_for(status);

    let resp_body: serde_json::Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
    };

    let formatted = render(&resp_body, raw);
    if exit_code == 0 {
        println!("{formatted}");
    } else {
        eprintln!("{formatted}");
    }

    exit_code
}

/// Execute a request and return the response (no printing).
/// Used by the chat loop, which prints only the reply text.
pub async fn raw_api_request(
    api_url: &str,
    method: reqwest::Method,
    segments: &[&str],
    body: Option<serde_json::Value>,
) -> Result<(u16, serde_json::Value), serde_json::Value> {
    let url = endpoint(api_url, segments).map_err(|message| {
        json!({
            "error": "cli_error",
            "message": message
        })
    })?;

    let mut req = client().request(method, url);
    if let Some(b) = body {
        req = req.json(&b);
    }

    let resp = req.send().await.map_err(|e| connection_error(&e))?;
    let status = resp.status().as_u16();
    let body: serde_json::Value = resp
        .json()
        .await
        .unwrap_or(json!({"error": "non-json response"}));

    Ok((status, body))
}

pub fn print_json(value: &serde_json::Value, raw: bool) {
    println!("{}", render(value, raw));
}

pub fn eprint_json(value: &serde_json::Value) {
    eprintln!("{}", render(value, false));
}

pub fn exit_code_for(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}

fn connection_error(e: &reqwest::Error) -> serde_json::Value {
    json!({
        "error": "connection_error",
        "message": format!("{e}"),
        "docs_hint": "Is the API server running? Check TUTOR_API_URL."
    })
}
