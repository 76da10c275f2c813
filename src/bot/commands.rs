use thiserror::Error;

/// One text command, already stripped of its prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join,
    Leave,
    Play(String),
    Skip,
    Pause,
    Resume,
    Volume(i64),
    Queue,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Not addressed to the bot at all; ignored silently.
    #[error("el mensaje no es un comando")]
    NotACommand,
    #[error("Unknown command `{0}`. Try `{1}help`.")]
    Unknown(String, String),
    #[error("Usage: `{0}`")]
    Usage(String),
}

impl Command {
    /// Parses a chat line such as `!play never gonna give you up`.
    pub fn parse(prefix: &str, line: &str) -> Result<Self, ParseError> {
        let body = line.trim().strip_prefix(prefix).ok_or(ParseError::NotACommand)?;

        let (name, args) = match body.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (body, ""),
        };
        if name.is_empty() {
            return Err(ParseError::NotACommand);
        }

        match name.to_lowercase().as_str() {
            "join" => Ok(Command::Join),
            "leave" => Ok(Command::Leave),
            "play" if args.is_empty() => Err(ParseError::Usage(format!("{prefix}play <query or URL>"))),
            "play" => Ok(Command::Play(args.to_string())),
            "skip" => Ok(Command::Skip),
            "pause" => Ok(Command::Pause),
            "resume" => Ok(Command::Resume),
            "volume" => args
                .parse()
                .map(Command::Volume)
                .map_err(|_| ParseError::Usage(format!("{prefix}volume <percent>"))),
            "queue" => Ok(Command::Queue),
            "help" => Ok(Command::Help),
            other => Err(ParseError::Unknown(other.to_string(), prefix.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Join => "join",
            Command::Leave => "leave",
            Command::Play(_) => "play",
            Command::Skip => "skip",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Volume(_) => "volume",
            Command::Queue => "queue",
            Command::Help => "help",
        }
    }
}

pub fn help_text(prefix: &str) -> String {
    [
        ("join", "join your voice channel"),
        ("leave", "leave and clear the queue"),
        ("play <query>", "queue a song by search or URL"),
        ("skip", "skip the current track"),
        ("pause", "pause playback"),
        ("resume", "resume playback"),
        ("volume <percent>", "set the volume of the current track"),
        ("queue", "show upcoming tracks"),
    ]
    .iter()
    .map(|(usage, what)| format!("`{prefix}{usage}` - {what}"))
    .collect::<Vec<_>>()
    .join("\n")
}
