use std::io::{self, Write};

use medchat::core::SessionEvent;
use medchat::core::conversation::Message;
use medchat::model::Role;
use owo_colors::OwoColorize;

pub const BAR_CHAR: &str = "▎";

/// Prints conversation changes as they arrive.
///
/// Streamed replies are printed incrementally, only the new part of the
/// accumulated text is written on each update.
#[derive(Debug, Default)]
pub struct Renderer {
    live: Option<usize>,
    printed: usize,
}

impl Renderer {
    /// Whether a reply is being printed right now.
    pub fn is_streaming(&self) -> bool {
        self.live.is_some() && self.printed > 0
    }

    pub fn render<W: Write>(
        &mut self,
        out: &mut W,
        event: SessionEvent,
    ) -> io::Result<()> {
        match event {
            SessionEvent::Appended { index, message } => {
                if message.is_transient() {
                    self.live = Some(index);
                    self.printed = 0;
                } else if message.role() != Role::User {
                    print_message(out, &message)?;
                }
            }
            SessionEvent::Updated { index, message } => {
                if self.live != Some(index) {
                    return print_message(out, &message);
                }
                if message.role() != Role::Assistant {
                    self.end_line(out)?;
                    self.live = None;
                    return print_message(out, &message);
                }
                self.print_delta(out, message.content())?;
                if !message.is_transient() {
                    self.end_line(out)?;
                    if let Some(image_url) = message.image_url() {
                        print_image(out, image_url)?;
                    }
                    self.live = None;
                }
            }
            SessionEvent::Removed { index } => {
                if self.live == Some(index) {
                    self.end_line(out)?;
                    self.live = None;
                }
            }
            SessionEvent::Replaced(messages) => {
                self.live = None;
                for message in &messages {
                    print_message(out, message)?;
                }
            }
            SessionEvent::ConversationId(id) => {
                writeln!(out, "{}", format!("(conversation {id})").dimmed())?;
            }
        }
        out.flush()
    }

    fn print_delta<W: Write>(
        &mut self,
        out: &mut W,
        content: &str,
    ) -> io::Result<()> {
        let Some(delta) = content.get(self.printed..) else {
            return Ok(());
        };
        if delta.is_empty() {
            return Ok(());
        }
        if self.printed == 0 {
            write!(out, "{}🤖 ", BAR_CHAR.bright_cyan())?;
        }
        write!(out, "{delta}")?;
        self.printed = content.len();
        Ok(())
    }

    fn end_line<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        if self.printed > 0 {
            writeln!(out)?;
            self.printed = 0;
        }
        Ok(())
    }
}

fn print_message<W: Write>(out: &mut W, message: &Message) -> io::Result<()> {
    match message.role() {
        Role::User => writeln!(
            out,
            "{}🧑 {}",
            BAR_CHAR.bright_green(),
            message.content().bright_white()
        )?,
        Role::Assistant => writeln!(
            out,
            "{}🤖 {}",
            BAR_CHAR.bright_cyan(),
            message.content()
        )?,
        Role::System => writeln!(
            out,
            "{}⚠️  {}",
            BAR_CHAR.bright_yellow(),
            message.content().yellow()
        )?,
    }
    if let Some(image_url) = message.image_url() {
        print_image(out, image_url)?;
    }
    Ok(())
}

fn print_image<W: Write>(out: &mut W, image_url: &str) -> io::Result<()> {
    if image_url.starts_with("data:") {
        writeln!(out, "{}", "[attached image]".dimmed())
    } else {
        writeln!(out, "🖼  {}", image_url.underline())
    }
}

#[cfg(test)]
mod tests {
    use medchat::core::conversation::{
        ConversationStore, MessagePatch, Target,
    };

    use super::*;

    fn render_all(events: Vec<SessionEvent>) -> String {
        let mut renderer = Renderer::default();
        let mut out = vec![];
        for event in events {
            renderer.render(&mut out, event).unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    fn transient(content: &str) -> Message {
        let mut store = ConversationStore::new();
        let index = store.append_transient_placeholder(Role::Assistant);
        store.stream_progress(content);
        store.messages()[index].clone()
    }

    fn finalized(content: &str) -> Message {
        let mut store = ConversationStore::new();
        store.append_transient_placeholder(Role::Assistant);
        let index = store
            .update_transient(Target::Current, MessagePatch::finalize(content))
            .unwrap();
        store.messages()[index].clone()
    }

    #[test]
    fn test_streamed_reply() {
        let output = render_all(vec![
            SessionEvent::Appended {
                index: 1,
                message: Message::new(Role::User, "hi"),
            },
            SessionEvent::Appended {
                index: 2,
                message: transient(""),
            },
            SessionEvent::Updated {
                index: 2,
                message: transient("He"),
            },
            SessionEvent::Updated {
                index: 2,
                message: transient("Hello"),
            },
            SessionEvent::Updated {
                index: 2,
                message: finalized("Hello"),
            },
        ]);
        assert!(output.contains("🤖 Hello\n"));
        assert_eq!(output.matches("Hello").count(), 1);
        assert_eq!(output.matches('\n').count(), 1);
    }

    #[test]
    fn test_whole_reply() {
        let output = render_all(vec![
            SessionEvent::Appended {
                index: 0,
                message: transient(""),
            },
            SessionEvent::Updated {
                index: 0,
                message: finalized("Drink water."),
            },
        ]);
        assert!(output.contains("🤖 Drink water.\n"));
    }

    #[test]
    fn test_failed_reply() {
        let output = render_all(vec![
            SessionEvent::Appended {
                index: 0,
                message: transient(""),
            },
            SessionEvent::Updated {
                index: 0,
                message: transient("Par"),
            },
            SessionEvent::Updated {
                index: 0,
                message: Message::new(Role::System, "Sorry"),
            },
        ]);
        assert!(output.contains("Par\n"));
        assert!(output.contains("Sorry"));
    }

    #[test]
    fn test_cancelled_placeholder() {
        let mut renderer = Renderer::default();
        let mut out = vec![];
        renderer
            .render(
                &mut out,
                SessionEvent::Appended {
                    index: 0,
                    message: transient(""),
                },
            )
            .unwrap();
        renderer
            .render(&mut out, SessionEvent::Removed { index: 0 })
            .unwrap();
        assert!(out.is_empty());
        assert!(!renderer.is_streaming());
    }
}
