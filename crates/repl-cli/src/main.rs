//! mcp-repl
//!
//! Interactive shell over a tool-calling session. Plain lines go to the
//! model; lines starting with `/` are commands (see `/help`).

mod commands;
mod config;
mod tools;

use std::io::Write as _;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use repl_core::{AgentError, Session, ToolRegistry};
use repl_runtime::default_selector;

use crate::commands::Command;
use crate::config::ReplConfig;
use crate::tools::{Workspace, register_local_tools};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing; stderr keeps log lines out of the transcript
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ReplConfig::from_env()?;

    // Backends
    let selector = Arc::new(default_selector());
    if let Some(name) = &config.backend {
        if let Err(e) = selector.switch(name) {
            tracing::warn!("REPL_BACKEND={} ignored: {}", name, e);
        }
    }

    // Tools
    let workspace = Workspace::new(&config.workdir)?;
    let registry = Arc::new(ToolRegistry::new());
    register_local_tools(&registry, &workspace);
    tracing::info!("Registered {} tools in {}", registry.len(), workspace.root().display());

    let session = match Session::start(selector, registry, config.executor.clone()) {
        Ok(session) => session,
        Err(e @ AgentError::NoProviderAvailable(_)) => {
            eprintln!("{}", e.user_message());
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(model) = &config.model {
        session.set_model(model)?;
    }

    print_banner(&session, &workspace);
    repl(&session).await?;

    tracing::info!(session = %session.id().short(), "Session closed");
    Ok(())
}

fn print_banner(session: &Session, workspace: &Workspace) {
    println!("══════════════════════════════════════════════════");
    println!(" mcp-repl · session {}", session.id().short());
    if let Some(backend) = session.current_backend() {
        println!(" backend: {} ({})", backend.name, backend.model);
    }
    println!(" tools:   {}", session.tool_names().join(", "));
    println!(" workdir: {}", workspace.root().display());
    println!("══════════════════════════════════════════════════");
    println!("Type /help for commands, /quit to exit.");
}

fn prompt() -> std::io::Result<()> {
    print!("\n> ");
    std::io::stdout().flush()
}

async fn repl(session: &Session) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt()?;
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        // EOF or Ctrl-C at the prompt
        let Some(line) = line else {
            println!();
            break;
        };

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(usage) => {
                println!("{usage}");
                continue;
            }
        };

        match command {
            Command::Empty => {}
            Command::Quit => break,
            Command::Chat(text) => chat(session, &text).await,
            other => match commands::run(&other, session).await {
                Ok(output) => println!("{output}"),
                Err(e) => println!("{}", e.user_message()),
            },
        }
    }

    Ok(())
}

async fn chat(session: &Session, text: &str) {
    tokio::select! {
        result = session.execute(text) => match result {
            Ok(answer) => {
                println!("\n{}", answer.text);
                if !answer.is_complete() {
                    println!("\n[stopped after {} rounds; the answer may be incomplete]", answer.rounds);
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Turn failed");
                println!("{}", e.user_message());
            }
        },
        _ = tokio::signal::ctrl_c() => {
            // Dispatched tools keep running and are recorded before the next turn
            println!("\n[cancelled]");
        }
    }
}
