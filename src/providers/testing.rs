//! In-process gateway that replays a fixed script

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::conversation::ChatTurn;

use super::{boxed, ModelGateway, ProviderError, TokenStream};

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Chunk(&'static str),
    Fail(&'static str),
    Delay(Duration),
    /// Never yields again
    Hang,
}

/// What the gateway saw on its last call
#[derive(Debug, Clone, Default)]
pub(crate) struct Captured {
    pub system: String,
    pub turns: Vec<ChatTurn>,
}

pub(crate) struct ScriptedGateway {
    steps: Vec<Step>,
    refuse: Option<u16>,
    captured: Arc<Mutex<Option<Captured>>>,
}

impl ScriptedGateway {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            refuse: None,
            captured: Arc::default(),
        }
    }

    pub fn chunks(chunks: &[&'static str]) -> Self {
        Self::new(chunks.iter().copied().map(Step::Chunk).collect())
    }

    /// Fail before producing a stream, as an upstream HTTP error would.
    pub fn refusing(status: u16) -> Self {
        Self {
            refuse: Some(status),
            ..Self::new(Vec::new())
        }
    }

    pub fn captured(&self) -> Arc<Mutex<Option<Captured>>> {
        Arc::clone(&self.captured)
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_chat(
        &self,
        system: &str,
        turns: &[ChatTurn],
    ) -> Result<TokenStream, ProviderError> {
        *self.captured.lock().unwrap() = Some(Captured {
            system: system.to_string(),
            turns: turns.to_vec(),
        });

        if let Some(status) = self.refuse {
            return Err(ProviderError::Upstream {
                status,
                message: "rate limited".into(),
            });
        }

        let steps = self.steps.clone();
        let stream = futures::stream::iter(steps).then(|step| async move {
            match step {
                Step::Chunk(text) => Some(Ok(text.to_string())),
                Step::Fail(message) => Some(Err(ProviderError::InvalidResponse(message.into()))),
                Step::Delay(duration) => {
                    tokio::time::sleep(duration).await;
                    None
                }
                Step::Hang => {
                    futures::future::pending::<()>().await;
                    None
                }
            }
        });

        Ok(boxed(stream.filter_map(futures::future::ready)))
    }
}
