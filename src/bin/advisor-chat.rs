//! Terminal chat with the Qihang advisor
//!
//! Reads one message per line from stdin and prints the answer as it
//! streams in. Ctrl-C cancels the answer in progress.

use std::env;
use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use qihang_advisor::client::{ChatSession, ChatView, RelayClient, SendOutcome};
use qihang_advisor::config::{prompts_builtin, AgentKind};
use qihang_advisor::conversation::Role;
use qihang_advisor::framing::StreamFormat;

/// Prints only the part of the live assistant message not yet shown.
#[derive(Default)]
struct Renderer {
    message_id: Option<String>,
    printed: usize,
}

impl Renderer {
    fn render(&mut self, view: &ChatView) -> std::io::Result<()> {
        let Some(last) = view.conversation.last() else {
            return Ok(());
        };
        if last.role != Role::Assistant || last.synthetic {
            return Ok(());
        }

        let mut out = std::io::stdout().lock();
        if self.message_id.as_deref() != Some(last.id.as_str()) {
            self.message_id = Some(last.id.clone());
            self.printed = 0;
            write!(out, "\nQihang: ")?;
        }

        let text = last.text();
        if let Some(fresh) = text.get(self.printed..) {
            write!(out, "{}", fresh)?;
            self.printed = text.len();
        }
        out.flush()
    }
}

fn build_client() -> anyhow::Result<RelayClient> {
    let url = env::var("ADVISOR_URL").unwrap_or_else(|_| "http://127.0.0.1:3000/api/chat".into());

    let format = match env::var("ADVISOR_FORMAT") {
        Ok(value) => StreamFormat::parse(&value)
            .ok_or_else(|| anyhow::anyhow!("ADVISOR_FORMAT must be text or events, got {}", value))?,
        Err(_) => StreamFormat::Text,
    };

    let agent = match env::var("ADVISOR_AGENT") {
        Ok(value) => AgentKind::parse(&value)
            .ok_or_else(|| anyhow::anyhow!("Unknown ADVISOR_AGENT: {}", value))?,
        Err(_) => AgentKind::default(),
    };

    let mut client = RelayClient::new(url)?.with_format(format).with_agent(agent);
    if let Ok(token) = env::var("ADVISOR_TOKEN") {
        client = client.with_bearer_token(token);
    }
    Ok(client)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qihang_advisor=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let client = build_client()?;
    tracing::info!(session_id = client.session_id(), "Starting chat session");

    let chat = ChatSession::new(client);
    let mut views = chat.subscribe();
    let mut renderer = Renderer::default();

    println!("Qihang: {}", prompts_builtin::GREETING);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        let send = chat.send(&line);
        tokio::pin!(send);

        let outcome = loop {
            tokio::select! {
                outcome = &mut send => break Some(outcome),
                changed = views.changed() => {
                    if changed.is_ok() {
                        renderer.render(&views.borrow_and_update())?;
                    }
                }
                _ = tokio::signal::ctrl_c() => break None,
            }
        };
        renderer.render(&chat.view())?;

        match outcome {
            Some(SendOutcome::Failed(e)) => eprintln!("\n[error] {}", e),
            Some(SendOutcome::Cancelled) | None => println!("\n[cancelled]"),
            Some(SendOutcome::Completed { .. }) => println!(),
            Some(SendOutcome::Ignored(_)) => {}
        }
    }

    Ok(())
}
