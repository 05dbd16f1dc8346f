use std::{fmt, io};

use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, Lines};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Leading character that turns a line into a control command.
pub const SENTINEL: char = '#';

pub const LOGIN_VERB: &str = "login";

/// Prefix the relay operator's console messages carry on the wire.
pub const ANNOUNCEMENT_PREFIX: &str = "SERVER MSG> ";

/// A line split into its command verb and argument.
///
/// There is no escaping: chat text that starts with [`SENTINEL`] parses as a
/// command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line<'a> {
    Command(CommandLine<'a>),
    Chat(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandLine<'a> {
    pub raw: &'a str,
    pub verb: &'a str,
    /// Everything after the verb, trimmed. Empty when no argument was given.
    pub arg: &'a str,
}

impl<'a> CommandLine<'a> {
    /// First whitespace-delimited token of the argument, if any.
    pub fn first_arg(&self) -> Option<&'a str> {
        self.arg.split_whitespace().next()
    }
}

impl<'a> Line<'a> {
    pub fn parse(line: &'a str) -> Self {
        let Some(body) = line.strip_prefix(SENTINEL) else {
            return Line::Chat(line);
        };

        let (verb, arg) = match body.find(char::is_whitespace) {
            Some(split) => (&body[..split], body[split..].trim()),
            None => (body, ""),
        };

        Line::Command(CommandLine {
            raw: line,
            verb,
            arg,
        })
    }

    /// The identity claimed by a login line, or `None` for any other line.
    ///
    /// Every command whose text starts with `#login` is a login attempt,
    /// glued forms such as `#loginbob` included. The identity is whatever
    /// follows the first space, trimmed, so it is empty when the line has
    /// no space or nothing after it.
    pub fn login_identity(&self) -> Option<&'a str> {
        let Line::Command(command) = self else {
            return None;
        };
        if !command.verb.starts_with(LOGIN_VERB) {
            return None;
        }
        let identity = command
            .raw
            .split_once(' ')
            .map_or("", |(_, rest)| rest.trim());
        Some(identity)
    }

    pub fn is_login(&self) -> bool {
        self.login_identity().is_some()
    }
}

/// The line a client sends to claim its identity.
pub fn login_command(identity: &str) -> String {
    format!("{SENTINEL}{LOGIN_VERB} {identity}")
}

/// An authenticated message on its way to every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: String,
    pub payload: String,
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.sender, self.payload)
    }
}

/// Reads the next non-empty frame, without its line ending.
///
/// Returns `Ok(None)` once the peer has closed its side. Built on
/// [`Lines::next_line`], so it can sit in a `select!` without losing a
/// partially received line.
pub async fn read_frame<R>(lines: &mut Lines<R>) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if !trimmed.is_empty() {
            return Ok(Some(trimmed.to_string()));
        }
    }
    Ok(None)
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // One write per frame, flushed so peers see it immediately.
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_chat() {
        assert_eq!(Line::parse("hello there"), Line::Chat("hello there"));
        assert_eq!(Line::parse(" #not a command"), Line::Chat(" #not a command"));
    }

    #[test]
    fn sentinel_lines_split_verb_and_argument() {
        let Line::Command(command) = Line::parse("#setport   6000 ") else {
            panic!("expected a command");
        };
        assert_eq!(command.verb, "setport");
        assert_eq!(command.arg, "6000");
        assert_eq!(command.first_arg(), Some("6000"));
        assert_eq!(command.raw, "#setport   6000 ");

        let Line::Command(bare) = Line::parse("#quit") else {
            panic!("expected a command");
        };
        assert_eq!(bare.verb, "quit");
        assert_eq!(bare.arg, "");
        assert_eq!(bare.first_arg(), None);
    }

    #[test]
    fn any_line_starting_with_login_is_a_login_attempt() {
        assert_eq!(Line::parse("#login alice").login_identity(), Some("alice"));
        assert_eq!(Line::parse("#login  alice  ").login_identity(), Some("alice"));
        assert_eq!(Line::parse("#login").login_identity(), Some(""));
        assert_eq!(Line::parse("#loginalice").login_identity(), Some(""));
        assert_eq!(Line::parse("#loginbob alice").login_identity(), Some("alice"));
        assert!(Line::parse("#login\talice").is_login());
        assert_eq!(Line::parse("#login\talice").login_identity(), Some(""));

        assert!(!Line::parse("login alice").is_login());
        assert!(!Line::parse("#logoff").is_login());
        assert!(!Line::parse("#log in").is_login());
        assert_eq!(login_command("alice"), "#login alice");
    }

    #[test]
    fn chat_message_renders_with_sender_prefix() {
        let message = ChatMessage {
            sender: "bob".into(),
            payload: "hi".into(),
        };
        assert_eq!(message.to_string(), "bob: hi");
    }

    #[tokio::test]
    async fn framing_skips_blank_lines_and_strips_endings() {
        use tokio::io::AsyncBufReadExt;

        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut lines = tokio::io::BufReader::new(reader).lines();

        writer
            .write_all(b"\r\n\nalice: hi\r\n")
            .await
            .expect("write raw bytes");
        write_line(&mut writer, "#login bob")
            .await
            .expect("write line");
        drop(writer);

        let first = read_frame(&mut lines).await.expect("read first");
        assert_eq!(first.as_deref(), Some("alice: hi"));
        let second = read_frame(&mut lines).await.expect("read second");
        assert_eq!(second.as_deref(), Some("#login bob"));
        let eof = read_frame(&mut lines).await.expect("read eof");
        assert_eq!(eof, None);
    }
}
