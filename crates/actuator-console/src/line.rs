//! Parsing of interactive console input.
//!
//! A line is either a controller command (`set_position 10`, `enable`) or a
//! console directive starting with `:`.

use actuator_protocol::Mode;

use crate::error::ConsoleError;

/// Help shown by `:help`.
pub const HELP: &str = "\
<command> [value]   send a controller command, e.g. `set_position 10.5`
:mode <mode>        switch encoding (human, binary, simplefoc)
:raw <text>         send text in SimpleFOC passthrough mode
:status             read position, velocity, torque and phase currents
:confirm            unblock commands whose outcome is unknown
:help               show this help
:quit               disconnect and exit";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleLine {
    /// A registered controller command.
    Command {
        /// Command name as typed.
        name: String,
        /// Optional decimal argument.
        value: Option<f64>,
    },
    /// Switch the wire encoding.
    Mode(Mode),
    /// Passthrough text, sent with a trailing newline.
    Raw(String),
    /// Print telemetry.
    Status,
    /// Clear the timeout ambiguity guard.
    Confirm,
    /// Print help.
    Help,
    /// Leave the console.
    Quit,
}

/// Parse a line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleLine>, ConsoleError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    if let Some(directive) = line.strip_prefix(':') {
        let (word, rest) = match directive.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (directive, ""),
        };
        let parsed = match word {
            "mode" if !rest.is_empty() => ConsoleLine::Mode(rest.parse()?),
            "mode" => return Err(ConsoleError::Usage("usage: :mode <human|binary|simplefoc>".into())),
            "raw" => ConsoleLine::Raw(rest.to_string()),
            "status" => ConsoleLine::Status,
            "confirm" => ConsoleLine::Confirm,
            "help" | "h" | "?" => ConsoleLine::Help,
            "quit" | "q" | "exit" => ConsoleLine::Quit,
            other => return Err(ConsoleError::Usage(format!("unknown directive :{}", other))),
        };
        return Ok(Some(parsed));
    }

    let mut tokens = line.split_whitespace();
    let name = tokens.next().unwrap_or_default().to_string();
    let value = match tokens.next() {
        Some(text) => Some(
            text.parse::<f64>()
                .map_err(|_| ConsoleError::Usage(format!("invalid number {:?}", text)))?,
        ),
        None => None,
    };
    if tokens.next().is_some() {
        return Err(ConsoleError::Usage("a command takes at most one value".into()));
    }
    Ok(Some(ConsoleLine::Command { name, value }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(
            parse_line("  set_position -2.5 ").unwrap(),
            Some(ConsoleLine::Command {
                name: "set_position".to_string(),
                value: Some(-2.5)
            })
        );
        assert_eq!(
            parse_line("enable").unwrap(),
            Some(ConsoleLine::Command {
                name: "enable".to_string(),
                value: None
            })
        );
    }

    #[test]
    fn test_parse_directives() {
        assert_eq!(parse_line(":mode binary").unwrap(), Some(ConsoleLine::Mode(Mode::Binary)));
        assert_eq!(
            parse_line(":raw M10 V2").unwrap(),
            Some(ConsoleLine::Raw("M10 V2".to_string()))
        );
        assert_eq!(parse_line(":q").unwrap(), Some(ConsoleLine::Quit));
        assert_eq!(parse_line(":status").unwrap(), Some(ConsoleLine::Status));
    }

    #[test]
    fn test_parse_skips_blank_and_comments() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("   # home first").unwrap(), None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_line(":mode"), Err(ConsoleError::Usage(_))));
        assert!(matches!(parse_line(":mode serial"), Err(ConsoleError::Protocol(_))));
        assert!(matches!(parse_line(":fly"), Err(ConsoleError::Usage(_))));
        assert!(matches!(parse_line("set_torque abc"), Err(ConsoleError::Usage(_))));
        assert!(matches!(parse_line("set_torque 1 2"), Err(ConsoleError::Usage(_))));
    }
}
