//! Trigger parsing: `<prefix><token>` at the very start of a message.

use crate::config::CommandsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Render command; carries the text after the command token.
    Render(&'a str),
    Version,
}

/// Parse the command at the start of `text`. The token must be followed by whitespace,
/// a fence backtick or the end of the message, so `tex!cat` is not `tex!c`.
pub fn parse_command<'a>(text: &'a str, commands: &CommandsConfig) -> Option<Command<'a>> {
    if commands.prefix.is_empty() {
        return None;
    }
    let rest = text.strip_prefix(commands.prefix.as_str())?;
    let mut chars = rest.chars();
    let token = chars.next()?;
    let args = chars.as_str();
    let boundary = args.is_empty() || args.starts_with(char::is_whitespace) || args.starts_with('`');
    if !boundary {
        return None;
    }
    if token == commands.render {
        Some(Command::Render(args))
    } else if token == commands.version {
        Some(Command::Version)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands() -> CommandsConfig {
        CommandsConfig::default()
    }

    #[test]
    fn render_command_with_block() {
        assert_eq!(
            parse_command("tex!c ```latex\nE=mc^2\n```", &commands()),
            Some(Command::Render(" ```latex\nE=mc^2\n```"))
        );
        assert_eq!(
            parse_command("tex!c```x```", &commands()),
            Some(Command::Render("```x```"))
        );
        assert_eq!(parse_command("tex!c", &commands()), Some(Command::Render("")));
    }

    #[test]
    fn version_command() {
        assert_eq!(parse_command("tex!v", &commands()), Some(Command::Version));
        assert_eq!(parse_command("tex!v please", &commands()), Some(Command::Version));
    }

    #[test]
    fn non_commands() {
        let c = commands();
        assert_eq!(parse_command("hello tex!c ```x```", &c), None);
        assert_eq!(parse_command("tex!cat", &c), None);
        assert_eq!(parse_command("tex!x ```x```", &c), None);
        assert_eq!(parse_command("tex!", &c), None);
        assert_eq!(parse_command("!c ```x```", &c), None);
    }

    #[test]
    fn custom_prefix_and_token() {
        let c = CommandsConfig {
            prefix: "!".to_string(),
            render: 'r',
            version: 'v',
        };
        assert_eq!(parse_command("!r ```x```", &c), Some(Command::Render(" ```x```")));
        assert_eq!(parse_command("tex!c ```x```", &c), None);
    }
}
