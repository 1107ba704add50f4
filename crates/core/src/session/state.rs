use std::collections::{HashMap, VecDeque};
use std::fmt::{self, Debug};
use std::sync::Arc;

use medchat_model::{
    ChatReply, ChatRequest, ErrorKind, History, ImageGeneration,
    ImageRequest, Role,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::SessionEvent;
use crate::Error;
use crate::client::{BackendClient, cancellable};
use crate::conversation::{
    Conversation, ConversationStore, Message, MessagePatch, Target,
};
use crate::id_store::IdStore;
use crate::reassembler::Outcome;
use crate::route::{Features, Route, select_route};

pub(crate) type EventFn = Box<dyn Fn(SessionEvent) + Send + Sync>;
pub(crate) type IdleFn = Box<dyn Fn() + Send + Sync>;

pub(crate) const WELCOME: &str = "\
    Hello! I'm an AI medical assistant and can answer basic questions \
    about health. You can send text or images. My answers are for \
    reference only and are not medical advice. In an emergency, seek \
    medical care immediately.";
pub(crate) const WELCOME_BACK: &str = "\
    Welcome back! How can I continue to help you? You can send text or \
    images.";
pub(crate) const HISTORY_LOAD_FAILED: &str = "\
    Failed to load the conversation history, but you can continue with \
    a new conversation.";
pub(crate) const IMAGE_GENERATION_FAILED: &str = "\
    Sorry, the image could not be generated. Please try a more detailed \
    description, or try again later.";
pub(crate) const IMAGE_SERVICE_UNAVAILABLE: &str = "\
    Sorry, the image generation service is temporarily unavailable. \
    Please try again later.";

/// Formats the system message that replaces a failed reply.
pub(crate) fn explain_error(err: &Error) -> String {
    format!(
        "Sorry, the service is temporarily unavailable: {err}\n\n\
         If you need urgent medical help, contact your doctor or call \
         emergency services immediately."
    )
}

pub(crate) enum Command {
    Send(String),
    AttachImage(String),
    ClearImage,
    ReloadHistory,
    NewConversation,
    Cancel,
    SetStreaming(bool),
    Snapshot(oneshot::Sender<Conversation>),
    WaitIdle(oneshot::Sender<()>),
}

impl Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Send(text) => f.debug_tuple("Send").field(text).finish(),
            Command::AttachImage(data) => f
                .debug_struct("AttachImage")
                .field("len", &data.len())
                .finish(),
            Command::ClearImage => f.write_str("ClearImage"),
            Command::ReloadHistory => f.write_str("ReloadHistory"),
            Command::NewConversation => f.write_str("NewConversation"),
            Command::Cancel => f.write_str("Cancel"),
            Command::SetStreaming(enabled) => {
                f.debug_tuple("SetStreaming").field(enabled).finish()
            }
            Command::Snapshot(_) => f.write_str("Snapshot"),
            Command::WaitIdle(_) => f.write_str("WaitIdle"),
        }
    }
}

#[derive(Debug)]
pub(crate) enum TaskMessage {
    Progress { task_id: u64, accumulated: String },
    Finished { task_id: u64, result: TaskResult },
}

#[derive(Debug)]
pub(crate) enum TaskResult {
    Reply(Result<ChatReply, Error>),
    Stream(Outcome),
    Images {
        prompt: String,
        result: Result<ImageGeneration, Error>,
    },
    History {
        conversation_id: String,
        result: Result<History, Error>,
    },
}

pub(crate) enum Intent {
    Send { text: String, image: Option<String> },
    ReloadHistory,
}

pub(crate) struct Running {
    task_id: u64,
    cancel: CancellationToken,
}

pub(crate) struct SessionState {
    pub(crate) client: BackendClient,
    pub(crate) store: ConversationStore,
    pub(crate) id_store: Option<Arc<dyn IdStore>>,
    pub(crate) features: Features,
    pub(crate) attached_image: Option<String>,
    pub(crate) pending: VecDeque<Intent>,
    pub(crate) current: Option<Running>,
    pub(crate) running_tasks: HashMap<u64, JoinHandle<()>>,
    pub(crate) next_task_id: u64,
    pub(crate) task_tx: mpsc::UnboundedSender<TaskMessage>,
    pub(crate) idle_waiters: Vec<oneshot::Sender<()>>,

    pub(crate) on_event: Option<EventFn>,
    pub(crate) on_idle: Option<IdleFn>,
}

impl SessionState {
    /// Restores the saved conversation, or greets the user.
    pub(crate) fn start(&mut self) {
        let saved_id = self.id_store.as_ref().and_then(|id_store| {
            id_store.load().unwrap_or_else(|err| {
                warn!("failed to load the saved conversation id: {err}");
                None
            })
        });
        match saved_id {
            Some(id) => {
                info!("restoring conversation {id}");
                self.store.set_conversation_id(id.clone());
                self.emit_with(|_| SessionEvent::ConversationId(id));
                self.pending.push_back(Intent::ReloadHistory);
            }
            None => {
                let idx = self
                    .store
                    .append_message(Message::new(Role::Assistant, WELCOME));
                self.emit_appended(idx);
            }
        }
        self.process_next();
    }

    pub(crate) fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Send(text) => {
                let text = text.trim();
                if text.is_empty() {
                    trace!("ignoring a blank message");
                    return;
                }
                let image = self.attached_image.take();
                self.enqueue(Intent::Send {
                    text: text.to_owned(),
                    image,
                });
            }
            Command::AttachImage(data) => {
                if !self.features.image_attach {
                    warn!("image attachments are disabled, dropping the image");
                    return;
                }
                self.attached_image = Some(data);
            }
            Command::ClearImage => self.attached_image = None,
            Command::ReloadHistory => self.enqueue(Intent::ReloadHistory),
            Command::NewConversation => self.new_conversation(),
            Command::Cancel => {
                if let Some(running) = &self.current {
                    debug!("cancelling task {}", running.task_id);
                    running.cancel.cancel();
                }
            }
            Command::SetStreaming(enabled) => {
                self.features.streaming = enabled;
            }
            Command::Snapshot(tx) => {
                tx.send(self.store.snapshot()).ok();
            }
            Command::WaitIdle(tx) => {
                if self.is_idle() {
                    tx.send(()).ok();
                } else {
                    self.idle_waiters.push(tx);
                }
            }
        }
    }

    pub(crate) fn handle_task_message(&mut self, msg: TaskMessage) {
        match msg {
            TaskMessage::Progress {
                task_id,
                accumulated,
            } => {
                if !self.is_current(task_id) {
                    return;
                }
                if let Some(idx) = self.store.stream_progress(&accumulated) {
                    self.emit_updated(idx);
                }
            }
            TaskMessage::Finished { task_id, result } => {
                self.running_tasks.remove(&task_id);
                if !self.is_current(task_id) {
                    trace!("discarding the result of stale task {task_id}");
                    return;
                }
                self.current = None;
                self.handle_result(result);
                self.process_next();
            }
        }
    }

    pub(crate) fn shutdown(&mut self) {
        for (task_id, task) in self.running_tasks.drain() {
            trace!("aborting task {task_id}");
            task.abort();
        }
    }

    #[inline]
    fn is_idle(&self) -> bool {
        self.current.is_none() && self.pending.is_empty()
    }

    #[inline]
    fn is_current(&self, task_id: u64) -> bool {
        self.current.as_ref().map(|r| r.task_id) == Some(task_id)
    }

    #[inline]
    fn enqueue(&mut self, intent: Intent) {
        // If a request is in flight, the intent just waits in the queue.
        // `process_next` runs again when the request finishes.
        self.pending.push_back(intent);
        self.process_next();
    }

    fn process_next(&mut self) {
        while self.current.is_none() {
            match self.pending.pop_front() {
                Some(Intent::Send { text, image }) => {
                    self.process_send(text, image)
                }
                Some(Intent::ReloadHistory) => self.process_reload(),
                None => {
                    // Nothing to process, so we can invoke the idle callback.
                    if let Some(on_idle) = &self.on_idle {
                        on_idle();
                    }
                    for waiter in self.idle_waiters.drain(..) {
                        waiter.send(()).ok();
                    }
                    return;
                }
            }
        }
    }

    fn process_send(&mut self, text: String, image: Option<String>) {
        let route = select_route(&text, image.is_some(), self.features);
        debug!("sending a message via {route:?}");

        // History is taken before the new turn is added.
        let history = self.store.history();
        let mut user_msg = Message::new(Role::User, text.clone());
        if let Some(image) = &image {
            user_msg = user_msg.with_image_url(image.clone());
        }
        let idx = self.store.append_message(user_msg);
        self.emit_appended(idx);
        let idx = self.store.append_transient_placeholder(Role::Assistant);
        self.emit_appended(idx);

        let conversation_id =
            self.store.conversation_id().map(ToOwned::to_owned);
        let client = self.client.clone();
        match route {
            Route::TextToImage { prompt } => {
                let req = ImageRequest {
                    prompt: prompt.clone(),
                    conversation_id,
                    options: Default::default(),
                };
                self.spawn_task(|_, cancel| async move {
                    let fut = client.send_text_to_image(req);
                    let result = cancellable(&cancel, fut).await;
                    TaskResult::Images { prompt, result }
                });
            }
            Route::Multimodal => {
                let req = ChatRequest {
                    message: text,
                    conversation_id,
                    history,
                    image_data: image,
                };
                self.spawn_task(|_, cancel| async move {
                    let fut = client.send_multimodal(req);
                    TaskResult::Reply(cancellable(&cancel, fut).await)
                });
            }
            Route::Plain => {
                let req = ChatRequest {
                    message: text,
                    conversation_id,
                    history,
                    image_data: None,
                };
                self.spawn_task(|_, cancel| async move {
                    let fut = client.send_text(req);
                    TaskResult::Reply(cancellable(&cancel, fut).await)
                });
            }
            Route::Streaming => {
                let req = ChatRequest {
                    message: text,
                    conversation_id,
                    history,
                    image_data: None,
                };
                let task_tx = self.task_tx.clone();
                self.spawn_task(|task_id, cancel| {
                    let fut = client.stream_reply(req, cancel, move |_, acc| {
                        task_tx
                            .send(TaskMessage::Progress {
                                task_id,
                                accumulated: acc.to_owned(),
                            })
                            .ok();
                    });
                    async move { TaskResult::Stream(fut.await) }
                });
            }
        }
    }

    fn process_reload(&mut self) {
        let Some(conversation_id) = self.store.conversation_id() else {
            debug!("no conversation to reload");
            return;
        };
        let conversation_id = conversation_id.to_owned();
        let fut = self.client.fetch_history(&conversation_id);
        self.spawn_task(|_, cancel| async move {
            let result = cancellable(&cancel, fut).await;
            TaskResult::History {
                conversation_id,
                result,
            }
        });
    }

    fn new_conversation(&mut self) {
        if let Some(running) = self.current.take() {
            // Its result will be discarded as stale.
            running.cancel.cancel();
        }
        self.pending.clear();
        self.attached_image = None;
        self.store.clear();
        if let Some(id_store) = &self.id_store {
            if let Err(err) = id_store.remove() {
                warn!("failed to forget the conversation id: {err}");
            }
        }
        info!("started a new conversation");

        self.store
            .append_message(Message::new(Role::Assistant, WELCOME));
        self.emit_replaced();
        self.process_next();
    }

    fn spawn_task<F, Fut>(&mut self, f: F)
    where
        F: FnOnce(u64, CancellationToken) -> Fut,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let task_id = self.next_task_id;
        self.next_task_id += 1;

        let cancel = CancellationToken::new();
        let fut = f(task_id, cancel.clone());
        let task_tx = self.task_tx.clone();
        let task = tokio::spawn(async move {
            let result = fut.await;
            task_tx.send(TaskMessage::Finished { task_id, result }).ok();
        });
        self.running_tasks.insert(task_id, task);
        self.current = Some(Running { task_id, cancel });
    }

    fn handle_result(&mut self, result: TaskResult) {
        match result {
            TaskResult::Reply(Ok(reply))
            | TaskResult::Stream(Outcome::Completed(reply)) => {
                self.finish_reply(reply)
            }
            TaskResult::Reply(Err(err))
                if err.kind() == ErrorKind::Cancelled =>
            {
                self.finish_cancelled()
            }
            TaskResult::Stream(Outcome::Cancelled) => self.finish_cancelled(),
            TaskResult::Reply(Err(err))
            | TaskResult::Stream(Outcome::Failed(err)) => self.fail(err),
            TaskResult::Images { prompt, result } => {
                self.finish_images(prompt, result)
            }
            TaskResult::History {
                conversation_id,
                result,
            } => self.finish_history(conversation_id, result),
        }
    }

    fn finish_reply(&mut self, reply: ChatReply) {
        if let Some(id) = reply.conversation_id {
            self.adopt_conversation_id(id);
        }
        let patch = MessagePatch::finalize(reply.content)
            .with_image_url(reply.image_url);
        self.finalize_placeholder(patch);
    }

    fn finish_images(
        &mut self,
        prompt: String,
        result: Result<ImageGeneration, Error>,
    ) {
        let generation = match result {
            Ok(generation) => generation,
            Err(err) if err.kind() == ErrorKind::Cancelled => {
                return self.finish_cancelled();
            }
            Err(err) if err.kind() == ErrorKind::Generation => {
                warn!("no image was generated: {err}");
                return self.fail_with(IMAGE_GENERATION_FAILED);
            }
            Err(err) => {
                error!("image generation failed: {err}");
                return self.fail_with(IMAGE_SERVICE_UNAVAILABLE);
            }
        };
        if let Some(id) = generation.conversation_id {
            self.adopt_conversation_id(id);
        }
        let Some(url) = generation.image_urls.into_iter().next() else {
            warn!("the backend returned no images");
            return self.fail_with(IMAGE_GENERATION_FAILED);
        };
        let content =
            format!("Generated an image from your description: {prompt}");
        let patch = MessagePatch::finalize(content).with_image_url(Some(url));
        self.finalize_placeholder(patch);
    }

    fn finish_history(
        &mut self,
        conversation_id: String,
        result: Result<History, Error>,
    ) {
        match result {
            Ok(history) => {
                info!(
                    "loaded {} messages of conversation {conversation_id}",
                    history.entries.len()
                );
                self.adopt_conversation_id(history.conversation_id);
                if history.entries.is_empty() {
                    self.store.replace_messages([Message::new(
                        Role::Assistant,
                        WELCOME_BACK,
                    )]);
                } else {
                    self.store.replace_messages(
                        history
                            .entries
                            .into_iter()
                            .map(Message::from_history_entry),
                    );
                }
            }
            Err(err) if err.kind() == ErrorKind::Cancelled => return,
            Err(err) => {
                warn!("failed to load conversation {conversation_id}: {err}");
                self.store.replace_messages([Message::new(
                    Role::System,
                    HISTORY_LOAD_FAILED,
                )]);
            }
        }
        self.emit_replaced();
    }

    fn finish_cancelled(&mut self) {
        let Some(idx) = self.store.transient_index() else {
            return;
        };
        if self.store.messages()[idx].content().is_empty() {
            debug!("cancelled before any content arrived");
            self.store.discard_transient();
            self.emit_with(|_| SessionEvent::Removed { index: idx });
        } else {
            let patch = MessagePatch {
                finalize: true,
                ..Default::default()
            };
            let updated = self.store.update_transient(Target::Index(idx), patch);
            if let Some(idx) = updated {
                self.emit_updated(idx);
            }
        }
    }

    fn fail(&mut self, err: Error) {
        error!("request failed: {err}");
        self.fail_with(explain_error(&err));
    }

    fn fail_with(&mut self, explanation: impl Into<String>) {
        let len = self.store.messages().len();
        let idx = self.store.fail_pending(explanation);
        if idx < len {
            self.emit_updated(idx);
        } else {
            self.emit_appended(idx);
        }
    }

    fn finalize_placeholder(&mut self, patch: MessagePatch) {
        match self.store.update_transient(Target::Current, patch) {
            Some(idx) => self.emit_updated(idx),
            None => warn!("no placeholder to finalize"),
        }
    }

    fn adopt_conversation_id(&mut self, id: String) {
        if !self.store.set_conversation_id(id.clone()) {
            return;
        }
        if let Some(id_store) = &self.id_store {
            if let Err(err) = id_store.save(&id) {
                warn!("failed to save the conversation id: {err}");
            }
        }
        self.emit_with(|_| SessionEvent::ConversationId(id));
    }

    fn emit_with(
        &self,
        make_event: impl FnOnce(&ConversationStore) -> SessionEvent,
    ) {
        if let Some(on_event) = &self.on_event {
            on_event(make_event(&self.store));
        }
    }

    fn emit_appended(&self, index: usize) {
        self.emit_with(|store| SessionEvent::Appended {
            index,
            message: store.messages()[index].clone(),
        });
    }

    fn emit_updated(&self, index: usize) {
        self.emit_with(|store| SessionEvent::Updated {
            index,
            message: store.messages()[index].clone(),
        });
    }

    fn emit_replaced(&self) {
        self.emit_with(|store| {
            SessionEvent::Replaced(store.messages().to_vec())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explain_error() {
        let err = Error::new(ErrorKind::Network, "connection refused");
        let text = explain_error(&err);
        assert!(text.starts_with(
            "Sorry, the service is temporarily unavailable: connection refused"
        ));
        assert!(text.contains("emergency services"));
    }
}
