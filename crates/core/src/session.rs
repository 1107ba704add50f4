mod builder;
mod state;

use std::collections::{HashMap, VecDeque};

use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use crate::conversation::{Conversation, ConversationStore, Message};
pub use builder::SessionBuilder;
use state::{Command, SessionState, TaskMessage};

/// A change of the conversation, reported to the session observer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// A message was appended at `index`.
    Appended {
        /// Position of the new message.
        index: usize,
        /// The new message.
        message: Message,
    },
    /// The message at `index` changed.
    Updated {
        /// Position of the changed message.
        index: usize,
        /// The message after the change.
        message: Message,
    },
    /// The message at `index` was removed.
    Removed {
        /// Position of the removed message.
        index: usize,
    },
    /// All messages were replaced.
    Replaced(Vec<Message>),
    /// The conversation id changed.
    ConversationId(String),
}

/// A chat session, which maintains a conversation, a backend, and
/// internal state.
///
/// Commands sent to the session are handled immediately, no matter what
/// the session is doing. For example, if a reply is being streamed, a new
/// message is queued and sent after the reply completes.
///
/// The session driver runs until the last clone of the session is
/// dropped, in-flight requests are aborted then.
#[derive(Clone)]
pub struct Session {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl Session {
    /// Sends a user message, with the attached image if there is one.
    ///
    /// Blank messages are ignored.
    #[inline]
    pub fn send_message<S: Into<String>>(&self, text: S) {
        self.post(Command::Send(text.into()));
    }

    /// Attaches an image to the next message.
    ///
    /// `image_data` is base64 encoded, optionally as a `data:` URI.
    #[inline]
    pub fn attach_image<S: Into<String>>(&self, image_data: S) {
        self.post(Command::AttachImage(image_data.into()));
    }

    /// Drops the attached image.
    #[inline]
    pub fn clear_image(&self) {
        self.post(Command::ClearImage);
    }

    /// Reloads the conversation from the backend.
    #[inline]
    pub fn reload_history(&self) {
        self.post(Command::ReloadHistory);
    }

    /// Abandons the current conversation and starts a new one.
    ///
    /// The in-flight request is cancelled and queued messages are dropped.
    #[inline]
    pub fn new_conversation(&self) {
        self.post(Command::NewConversation);
    }

    /// Cancels the in-flight request, if any.
    ///
    /// Text streamed so far is kept as the reply.
    #[inline]
    pub fn cancel(&self) {
        self.post(Command::Cancel);
    }

    /// Enables or disables streaming replies.
    #[inline]
    pub fn set_streaming(&self, enabled: bool) {
        self.post(Command::SetStreaming(enabled));
    }

    /// Returns a snapshot of the conversation.
    ///
    /// Returns `None` if the session driver has terminated.
    pub async fn snapshot(&self) -> Option<Conversation> {
        let (tx, rx) = oneshot::channel();
        self.post(Command::Snapshot(tx));
        rx.await.ok()
    }

    /// Waits until nothing is in flight and nothing is queued.
    pub async fn wait_idle(&self) {
        let (tx, rx) = oneshot::channel();
        self.post(Command::WaitIdle(tx));
        rx.await.ok();
    }

    fn post(&self, cmd: Command) {
        if let Err(err) = self.cmd_tx.send(cmd) {
            warn!("session driver has terminated, dropping {:?}", err.0);
        }
    }
}

impl Session {
    fn spawn_from_builder(builder: SessionBuilder) -> Self {
        let SessionBuilder {
            client,
            features,
            id_store,
            on_event,
            on_idle,
        } = builder;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let state = SessionState {
            client,
            store: ConversationStore::new(),
            id_store,
            features,
            attached_image: None,
            pending: VecDeque::new(),
            current: None,
            running_tasks: HashMap::new(),
            next_task_id: 1,
            task_tx,
            idle_waiters: vec![],
            on_event,
            on_idle,
        };
        tokio::spawn(
            run_session(state, cmd_rx, task_rx)
                .instrument(trace_span!("session")),
        );
        Self { cmd_tx }
    }
}

async fn run_session(
    mut state: SessionState,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    mut task_rx: mpsc::UnboundedReceiver<TaskMessage>,
) {
    debug!("started");
    state.start();
    loop {
        select! {
            biased;

            // The state keeps a sender, so this never closes.
            Some(msg) = task_rx.recv() => {
                trace!("received task message: {msg:?}");
                state.handle_task_message(msg);
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    break;
                };
                trace!("received command: {cmd:?}");
                let proc_span = trace_span!("proc cmd");
                proc_span.in_scope(|| state.handle_command(cmd));
            }
        }
    }
    state.shutdown();
    debug!("will terminate");
}
