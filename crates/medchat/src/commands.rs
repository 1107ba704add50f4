use tokio::io::{AsyncBufRead, Lines};

/// A line typed at the prompt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input<'a> {
    /// Nothing but whitespace.
    Empty,
    /// A message for the assistant.
    Message(&'a str),
    /// `/image <path>`
    AttachImage(&'a str),
    /// `/clear-image`
    ClearImage,
    /// `/history`
    History,
    /// `/stream on|off`
    Stream(bool),
    /// `/new`
    New,
    /// `/help`
    Help,
    /// `/quit`
    Quit,
    /// A command that is unknown or has bad arguments.
    Invalid(&'a str),
}

pub const HELP: &str = "\
/image <path>   attach an image to the next message
/clear-image    drop the attached image
/history        reload the conversation
/stream on|off  toggle streaming replies
/new            start a new conversation
/quit           exit (Ctrl-C cancels a pending reply)";

pub fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line);
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match (name, arg) {
        ("image", "") => Input::Invalid(line),
        ("image", path) => Input::AttachImage(path),
        ("clear-image", "") => Input::ClearImage,
        ("history", "") => Input::History,
        ("stream", arg) => match parse_switch(arg) {
            Some(enabled) => Input::Stream(enabled),
            None => Input::Invalid(line),
        },
        ("new", "") => Input::New,
        ("help", "") => Input::Help,
        ("quit" | "exit", "") => Input::Quit,
        _ => Input::Invalid(line),
    }
}

/// Parses an on/off switch, as typed or as set in the environment.
pub fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Some(true),
        "off" | "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Reads the next line of input, `None` at the end of input.
///
/// The reader is kept across calls so that lines pasted at once are not
/// lost with its buffer.
pub async fn read_line<R>(input: &mut Lines<R>) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    match input.next_line().await {
        Ok(line) => line,
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
