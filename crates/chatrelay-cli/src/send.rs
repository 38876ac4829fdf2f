//! `chatrelay send`: POST a request body to a relay route and print the
//! normalized response as it streams in.

use anyhow::{Context, Result, bail};
use chatrelay_core::{NormalizedStream, ResponseFormat};
use futures_util::StreamExt;
use std::io::{self, Write};

pub async fn run(url: &str, body: String, format: ResponseFormat) -> Result<()> {
    let response = reqwest::Client::new()
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .with_context(|| format!("Failed to reach {url}"))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        bail!("{} {}", status.as_u16(), error_message(&text));
    }

    tracing::debug!(%format, "streaming response");
    let mut snapshots = Box::pin(NormalizedStream::new(response.bytes_stream(), format));
    let mut stdout = io::stdout();
    let mut printed = String::new();
    while let Some(snapshot) = snapshots.next().await {
        let snapshot = snapshot.context("Response stream failed")?;
        stdout.write_all(delta(&printed, &snapshot).as_bytes())?;
        stdout.flush()?;
        printed = snapshot;
    }
    writeln!(stdout)?;
    Ok(())
}

/// The `{message}` of a relay error body, or the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

/// What to write to move the terminal from `printed` to `snapshot`.
///
/// Snapshots normally extend the previous one; anything else is reprinted
/// whole on a fresh line.
fn delta(printed: &str, snapshot: &str) -> String {
    match snapshot.strip_prefix(printed) {
        Some(rest) => rest.to_string(),
        None => format!("\n{snapshot}"),
    }
}
