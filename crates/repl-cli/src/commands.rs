//! Slash Commands

use std::fmt::Write as _;

use repl_core::{Message, Result, Role, Session};
use serde_json::Value;

pub const HELP: &str = "\
Commands:
  /backend <name>   switch backend (history is kept)
  /providers        list backends and whether they have credentials
  /model <name>     select a model for the current backend
  /tools            list available tools
  /call <tool> [json-args]
                    run a tool directly; the conversation is not touched
  /history          show the conversation so far
  /reset            clear the conversation
  /help             show this help
  /quit             exit";

/// A parsed REPL input line
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Backend(String),
    Providers,
    Model(String),
    Tools,
    /// Run a tool by hand with JSON arguments
    Call { tool: String, arguments: Value },
    History,
    Reset,
    Help,
    Quit,
    /// Anything that is not a command goes to the model
    Chat(String),
    Empty,
}

impl Command {
    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Self::Empty);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Self::Chat(line.to_string()));
        };

        let (name, arg) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        let arg = arg.trim();
        let needs_arg = |usage: &str| {
            if arg.is_empty() {
                Err(format!("Usage: {usage}"))
            } else {
                Ok(arg.to_string())
            }
        };

        match name {
            "backend" | "switch" => needs_arg("/backend <name>").map(Self::Backend),
            "providers" | "backends" => Ok(Self::Providers),
            "model" => needs_arg("/model <name>").map(Self::Model),
            "tools" => Ok(Self::Tools),
            "call" => parse_call(arg),
            "history" => Ok(Self::History),
            "reset" | "clear" => Ok(Self::Reset),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" | "q" => Ok(Self::Quit),
            other => Err(format!("Unknown command /{other}. Type /help for the list.")),
        }
    }
}

fn parse_call(arg: &str) -> std::result::Result<Command, String> {
    const USAGE: &str = "Usage: /call <tool> [json-args]";
    if arg.is_empty() {
        return Err(USAGE.into());
    }
    let (tool, json) = arg.split_once(char::is_whitespace).unwrap_or((arg, ""));
    let json = json.trim();
    let arguments = if json.is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_str(json).map_err(|e| format!("Invalid JSON arguments: {e}\n{USAGE}"))?
    };
    if !arguments.is_object() {
        return Err(format!("Tool arguments must be a JSON object\n{USAGE}"));
    }
    Ok(Command::Call {
        tool: tool.to_string(),
        arguments,
    })
}

/// Run a non-chat command and render its output
pub async fn run(command: &Command, session: &Session) -> Result<String> {
    match command {
        Command::Backend(name) => {
            let backend = session.switch_backend(name)?;
            Ok(format!("Switched to {} ({})", backend.name, backend.model))
        }
        Command::Providers => Ok(render_providers(session)),
        Command::Model(model) => {
            session.set_model(model)?;
            Ok(format!("Model set to {model}"))
        }
        Command::Tools => Ok(session.tool_names().join("\n")),
        Command::Call { tool, arguments } => Ok(session.call_tool(tool, arguments.clone()).await.render()),
        Command::History => Ok(render_history(&session.transcript().await)),
        Command::Reset => {
            session.reset().await;
            Ok("Conversation cleared.".into())
        }
        Command::Help => Ok(HELP.into()),
        Command::Quit | Command::Chat(_) | Command::Empty => Ok(String::new()),
    }
}

fn render_providers(session: &Session) -> String {
    let mut out = String::new();
    for backend in session.backends() {
        let marker = if backend.current { "*" } else { " " };
        let status = if backend.available { "ready" } else { "no credentials" };
        let _ = writeln!(out, "{marker} {:<10} {:<16} {}", backend.name, status, backend.model);
    }
    out.trim_end().to_string()
}

fn render_history(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages.iter().filter(|m| m.role != Role::System) {
        match message.role {
            Role::Tool => {
                let name = message.name.as_deref().unwrap_or("tool");
                let _ = writeln!(out, "[{name}] {}", first_line(message.text()));
            }
            _ if message.has_tool_calls() => {
                let names: Vec<&str> = message.tool_calls.iter().map(|c| c.name.as_str()).collect();
                let _ = writeln!(out, "{}: (calls {})", message.role, names.join(", "));
            }
            _ => {
                let _ = writeln!(out, "{}: {}", message.role, message.text());
            }
        }
    }
    if out.is_empty() {
        "(empty)".into()
    } else {
        out.trim_end().to_string()
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
