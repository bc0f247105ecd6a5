//! `tokwatch status` — print the current token budget of a running
//! instance, via the observer socket.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixStream;

use tokwatch_core::broadcast::StateSnapshot;
use tokwatch_core::ipc::{decode, socket_path, ServerMessage};

pub async fn run() -> Result<()> {
    let path = socket_path();
    let stream = UnixStream::connect(&path).await.with_context(|| {
        format!(
            "Could not reach a running tokwatch instance at {}",
            path.display()
        )
    })?;

    // The server greets every connection with the current snapshot.
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .context("Connection closed before a snapshot arrived")?;
    let ServerMessage::StateSnapshot { snapshot } = decode(line.trim_end().as_bytes())?;
    print!("{}", render(&snapshot));
    Ok(())
}

fn render(snapshot: &StateSnapshot) -> String {
    let state = &snapshot.state;
    let percent = if state.max_tokens > 0 {
        state.total as f64 / state.max_tokens as f64 * 100.0
    } else {
        0.0
    };
    format!(
        "Model:        {}\n\
         Input text:   {}\n\
         Input files:  {}\n\
         Thinking:     {}\n\
         Output text:  {}\n\
         Output files: {}\n\
         Total:        {} / {} ({:.1}%)\n",
        state.model,
        state.input_text,
        state.input_file,
        state.thinking,
        state.output_text,
        state.output_file,
        state.total,
        state.max_tokens,
        percent,
    )
}
