//! Chat command keywords

use std::fmt;
use std::str::FromStr;

use crate::error::ChatError;

/// Pseudo-origin used on server-originated responses
pub const SERVER_ORIGIN: &str = "@sv";

/// Commands understood by a TCP session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Register a name for this session
    Join,
    /// Announce the local UDP port
    PlusUdp,
    /// Public message to everyone else
    Pm,
    /// Direct message, text is `target:body`
    Dm,
    /// List registered names
    Ls,
    /// Leave
    Quit,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::Join,
        Command::PlusUdp,
        Command::Pm,
        Command::Dm,
        Command::Ls,
        Command::Quit,
    ];

    /// Wire keyword
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Join => "join",
            Command::PlusUdp => "+udp",
            Command::Pm => "pm",
            Command::Dm => "dm",
            Command::Ls => "ls",
            Command::Quit => "quit",
        }
    }
}

impl FromStr for Command {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|command| command.as_str() == s)
            .ok_or_else(|| ChatError::invalid_message(format!("unknown command '{}'", s)))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_parse_back() {
        for command in Command::ALL {
            assert_eq!(command.as_str().parse::<Command>().unwrap(), command);
        }
        assert_eq!("+udp".parse::<Command>().unwrap(), Command::PlusUdp);
    }

    #[test]
    fn test_unknown_keyword() {
        let err = "shout".parse::<Command>().unwrap_err();
        assert!(err.is_recoverable());
        assert!("PM".parse::<Command>().is_err());
    }
}
