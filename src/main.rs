//! One-shot caller: sends the command-line prompt and streams the answer

use agentic_chat::{init_tracing, ChatSession, SessionConfig, StreamFragment};
use std::io::Write;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.trim().is_empty() {
        eprintln!("usage: agentic-chat <prompt>");
        return ExitCode::from(2);
    }

    let config = match SessionConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };
    let show_thinking = config.show_thinking;

    let session = match ChatSession::from_config(&config) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Ctrl-C cancels the turn instead of killing the process
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut stdout = std::io::stdout();
    let mut in_thinking = false;
    let result = session
        .send_message_stream(&prompt, &cancel, |fragment| {
            match &fragment {
                StreamFragment::Thinking(text) if show_thinking => {
                    if !in_thinking {
                        let _ = write!(stdout, "[thinking] ");
                        in_thinking = true;
                    }
                    let _ = write!(stdout, "{}", text);
                }
                StreamFragment::Thinking(_) => {}
                StreamFragment::Content(text) => {
                    if in_thinking {
                        let _ = writeln!(stdout, "\n");
                        in_thinking = false;
                    }
                    let _ = write!(stdout, "{}", text);
                }
            }
            let _ = stdout.flush();
        })
        .await;

    match result {
        Ok(response) => {
            if response.used_tools {
                println!("\n\n[Tools were used to generate this response]");
            } else {
                println!();
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("\nerror: {}", e);
            ExitCode::FAILURE
        }
    }
}
