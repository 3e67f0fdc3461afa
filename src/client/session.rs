use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{AbortHandle, Abortable};
use futures::StreamExt;
use tokio::sync::watch;

use crate::conversation::{Conversation, Message};

use super::{ClientError, RelayClient};

/// Snapshot handed to observers
#[derive(Debug, Clone, Default)]
pub struct ChatView {
    pub conversation: Conversation,
    /// True from the user's send until the first assistant chunk lands
    pub loading: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    EmptyInput,
    Busy,
}

#[derive(Debug)]
pub enum SendOutcome {
    Ignored(IgnoreReason),
    Completed { chars: usize },
    Cancelled,
    Failed(ClientError),
}

/// One conversation with the advisor. Clones share the same session.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<Inner>,
}

struct Inner {
    client: RelayClient,
    view: watch::Sender<ChatView>,
    /// Only flipped while `abort` is locked, so a turn is never in flight
    /// without a handle `cancel` can reach.
    in_flight: AtomicBool,
    abort: Mutex<Option<AbortHandle>>,
}

/// Releases the in-flight slot on every exit path, including a dropped
/// `send` future.
struct TurnGuard<'a>(&'a Inner);

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.0.view.send_if_modified(|view| std::mem::take(&mut view.loading));

        let mut abort = self.0.abort.lock().unwrap_or_else(PoisonError::into_inner);
        abort.take();
        self.0.in_flight.store(false, Ordering::Release);
    }
}

impl ChatSession {
    /// Start a session whose transcript opens with the advisor greeting.
    pub fn new(client: RelayClient) -> Self {
        Self::with_conversation(client, Conversation::new().with_greeting())
    }

    pub fn with_conversation(client: RelayClient, conversation: Conversation) -> Self {
        let (view, _) = watch::channel(ChatView {
            conversation,
            ..ChatView::default()
        });

        Self {
            inner: Arc::new(Inner {
                client,
                view,
                in_flight: AtomicBool::new(false),
                abort: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatView> {
        self.inner.view.subscribe()
    }

    pub fn view(&self) -> ChatView {
        self.inner.view.borrow().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Abort the in-flight turn, if any. Text already rendered stays.
    /// Returns true whenever `is_busy` would, including before the first byte.
    pub fn cancel(&self) -> bool {
        let handle = self
            .inner
            .abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match handle {
            Some(handle) => {
                tracing::debug!("Cancelling in-flight chat turn");
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Send one user message and stream the advisor's answer into the view.
    pub async fn send(&self, input: &str) -> SendOutcome {
        if input.trim().is_empty() {
            return SendOutcome::Ignored(IgnoreReason::EmptyInput);
        }

        let (handle, registration) = AbortHandle::new_pair();
        {
            let mut abort = self
                .inner
                .abort
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if self
                .inner
                .in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                tracing::debug!("Ignoring send while a turn is in flight");
                return SendOutcome::Ignored(IgnoreReason::Busy);
            }
            *abort = Some(handle);
        }
        let _guard = TurnGuard(&self.inner);

        let mut history = Vec::new();
        self.inner.view.send_modify(|view| {
            view.conversation.add_user(input);
            view.loading = true;
            view.last_error = None;
            history = view.conversation.outbound();
        });

        match Abortable::new(self.stream_turn(history), registration).await {
            Ok(Ok(chars)) => {
                tracing::debug!("Chat turn completed with {} chars", chars);
                SendOutcome::Completed { chars }
            }
            Ok(Err(e)) => {
                tracing::warn!("Chat turn failed: {}", e);
                let message = e.to_string();
                self.inner.view.send_modify(|view| {
                    view.loading = false;
                    view.last_error = Some(message);
                });
                SendOutcome::Failed(e)
            }
            Err(_) => SendOutcome::Cancelled,
        }
    }

    /// Pull chunks in order; the first one creates the assistant message.
    async fn stream_turn(&self, history: Vec<Message>) -> Result<usize, ClientError> {
        let mut chunks = self.inner.client.open(&history).await?;
        let mut slot: Option<usize> = None;
        let mut chars = 0;

        while let Some(chunk) = chunks.next().await {
            let text = chunk?;
            if text.is_empty() {
                continue;
            }
            chars += text.chars().count();

            self.inner.view.send_modify(|view| match slot {
                Some(index) => {
                    if let Some(message) = view.conversation.messages.get_mut(index) {
                        message.append_text(&text);
                    }
                }
                None => {
                    slot = Some(view.conversation.add_assistant(&text));
                    view.loading = false;
                }
            });
        }

        Ok(chars)
    }
}
