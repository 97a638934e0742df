use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("chat needs a message")]
    EmptyChat,
    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),
    #[error("not a signaling blob: {0}")]
    NotJson(String),
    #[error("unexpected blob type '{0}'")]
    UnexpectedBlob(String),
    #[error("blob has no type")]
    MissingType,
}

/// One line typed or pasted on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Invite,
    /// A signaling blob from the other side; routed by its `type`.
    Offer(String),
    Answer(String),
    Chat(String),
    Status,
    Disconnect,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        if line.starts_with('{') {
            return Self::parse_blob(line).map(Some);
        }

        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let command = match word {
            "invite" => Command::Invite,
            "chat" | "say" => {
                let text = rest.trim();
                if text.is_empty() {
                    return Err(CommandError::EmptyChat);
                }
                Command::Chat(text.to_string())
            }
            "status" => Command::Status,
            "disconnect" | "leave" => Command::Disconnect,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }

    fn parse_blob(line: &str) -> Result<Command, CommandError> {
        let value: serde_json::Value = serde_json::from_str(line)
            .map_err(|e| CommandError::NotJson(e.to_string()))?;

        match value.get("type").and_then(|t| t.as_str()) {
            Some("offer") => Ok(Command::Offer(line.to_string())),
            Some("answer") => Ok(Command::Answer(line.to_string())),
            Some(other) => Err(CommandError::UnexpectedBlob(other.to_string())),
            None => Err(CommandError::MissingType),
        }
    }
}

pub const HELP: &str = "\
commands:
  invite              create an offer for a new guest
  <offer json>        join the host that produced it
  <answer json>       finish an invite
  chat <text>         send a chat line
  status              print session diagnostics
  disconnect          leave or stop hosting
  quit                exit";
