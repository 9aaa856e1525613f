#![cfg(test)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::gateway::{GatewayError, GatewayReply, GatewayRequest, ProviderError, TextGateway};
use crate::pipeline::AuthorPersona;

/// [`TextGateway`] that replays a fixed script of replies, one per call.
///
/// `Err` entries become a combined provider failure. Running out of script is
/// also a failure. A request whose token is already cancelled is refused
/// without consuming the script.
pub struct ScriptedGateway {
    replies: Mutex<VecDeque<Result<String, String>>>,
    calls: AtomicUsize,
    systems: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn new(replies: Vec<Result<String, String>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
            systems: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// System prompts seen so far, in call order.
    pub fn systems(&self) -> Vec<String> {
        self.systems.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGateway for ScriptedGateway {
    async fn call(&self, request: GatewayRequest) -> Result<GatewayReply, GatewayError> {
        if request.cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.systems.lock().unwrap().push(request.prompt.system.clone());
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(GatewayReply {
                text,
                provider_used: "scripted".into(),
            }),
            Some(Err(msg)) => Err(GatewayError::AllProvidersFailed {
                primary_name: "primary".into(),
                primary: ProviderError::Other(msg.clone()),
                secondary_name: "secondary".into(),
                secondary: ProviderError::Other(msg),
            }),
            None => Err(GatewayError::AllProvidersFailed {
                primary_name: "primary".into(),
                primary: ProviderError::EmptyReply,
                secondary_name: "secondary".into(),
                secondary: ProviderError::EmptyReply,
            }),
        }
    }
}

pub fn persona() -> AuthorPersona {
    AuthorPersona {
        name: "Луна".into(),
        style_prompt: "Пиши тепло.".into(),
        genre: "притча".into(),
    }
}
