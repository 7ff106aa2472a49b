//! Command requests and responses shared by the command socket and embedders.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::EngineHandle;

/// One request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List available commands.
    Help,
    /// List known zones.
    Zones,
    /// List scheduled and running tasks.
    Queue,
    /// Flush one zone's task, or every task.
    Flush(Option<String>),
    /// Re-read and re-sign a zone now.
    Sign(String),
    /// Reload the zone list.
    Reload,
    /// Stop the engine.
    Stop,
    /// Engine statistics.
    Stats,
}

/// Usage lines returned by `help`.
pub const USAGE: &[&str] = &[
    "help              show this text",
    "zones             list known zones",
    "queue             list scheduled and running tasks",
    "flush [<zone>]    run a zone's task now, or every task",
    "sign <zone>       re-read and re-sign a zone now",
    "reload            re-read the zone list",
    "stop              stop the engine",
    "stats             show engine statistics",
];

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default().to_ascii_lowercase();
        let arg = words.next().map(str::to_owned);
        if let Some(extra) = words.next() {
            return Err(format!("unexpected argument `{extra}`"));
        }
        let command = match (verb.as_str(), arg) {
            ("help", None) => Self::Help,
            ("zones", None) => Self::Zones,
            ("queue", None) => Self::Queue,
            ("flush", zone) => Self::Flush(zone),
            ("sign", Some(zone)) => Self::Sign(zone),
            ("sign", None) => return Err("sign requires a zone name".into()),
            ("reload", None) => Self::Reload,
            ("stop", None) => Self::Stop,
            ("stats", None) => Self::Stats,
            ("", _) => return Err("empty command".into()),
            (verb, Some(arg)) if USAGE.iter().any(|u| u.starts_with(verb)) => {
                return Err(format!("`{verb}` takes no argument, got `{arg}`"));
            }
            (verb, _) => return Err(format!("unknown command `{verb}`")),
        };
        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Help => f.write_str("help"),
            Self::Zones => f.write_str("zones"),
            Self::Queue => f.write_str("queue"),
            Self::Flush(None) => f.write_str("flush"),
            Self::Flush(Some(zone)) => write!(f, "flush {zone}"),
            Self::Sign(zone) => write!(f, "sign {zone}"),
            Self::Reload => f.write_str("reload"),
            Self::Stop => f.write_str("stop"),
            Self::Stats => f.write_str("stats"),
        }
    }
}

/// JSON response document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Human-readable outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Command-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandResponse {
    /// Success with a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Success with a payload.
    pub fn data<T: Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                ok: true,
                message: None,
                data: Some(value),
            },
            Err(e) => Self::error(format!("unable to encode response: {e}")),
        }
    }

    /// Failure.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

/// Execute `command` against the engine.
pub fn execute(handle: &EngineHandle, command: &Command) -> CommandResponse {
    match command {
        Command::Help => CommandResponse::data(&USAGE),
        Command::Zones => CommandResponse::data(&handle.list_zones()),
        Command::Queue => CommandResponse::data(&handle.list_tasks()),
        Command::Flush(None) => {
            let flagged = handle.flush_all();
            CommandResponse::message(format!("{flagged} tasks flushed"))
        }
        Command::Flush(Some(zone)) => match handle.flush_zone(zone) {
            Ok(()) => CommandResponse::message(format!("zone {zone} flushed")),
            Err(e) => CommandResponse::error(e.to_string()),
        },
        Command::Sign(zone) => match handle.sign_zone(zone) {
            Ok(()) => CommandResponse::message(format!("zone {zone} scheduled for immediate re-sign")),
            Err(e) => CommandResponse::error(e.to_string()),
        },
        Command::Reload => {
            handle.request_reload();
            CommandResponse::message("reload requested")
        }
        Command::Stop => {
            handle.request_shutdown();
            CommandResponse::message("shutdown requested")
        }
        Command::Stats => CommandResponse::data(&handle.stats()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_commands() {
        assert_eq!("help".parse::<Command>(), Ok(Command::Help));
        assert_eq!("  FLUSH ".parse::<Command>(), Ok(Command::Flush(None)));
        assert_eq!(
            "flush example.com".parse::<Command>(),
            Ok(Command::Flush(Some("example.com".into())))
        );
        assert_eq!("sign example.com".parse::<Command>(), Ok(Command::Sign("example.com".into())));
        assert!("sign".parse::<Command>().is_err());
        assert!("zones extra".parse::<Command>().is_err());
        assert!("frobnicate".parse::<Command>().is_err());
        assert!("".parse::<Command>().is_err());
        assert!("flush a b".parse::<Command>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for line in ["help", "flush", "flush example.com", "sign example.com", "stats"] {
            assert_eq!(line.parse::<Command>().unwrap().to_string(), line);
        }
    }

    #[test]
    fn response_encoding_skips_empty_fields() {
        let json = serde_json::to_string(&CommandResponse::message("done")).unwrap();
        assert_eq!(json, r#"{"ok":true,"message":"done"}"#);
        let json = serde_json::to_string(&CommandResponse::error("nope")).unwrap();
        assert_eq!(json, r#"{"ok":false,"message":"nope"}"#);
    }
}
