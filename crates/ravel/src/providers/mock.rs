use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;

use crate::errors::{AgentError, AgentResult};
use crate::models::fragment::ResponseFragment;
use crate::models::tool::Tool;
use crate::models::turn::Turn;
use crate::providers::base::{FragmentStream, GenerationConfig, Provider};

type Round = Vec<AgentResult<ResponseFragment>>;

/// What the provider was asked on one call
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub input: Turn,
    pub history: Vec<Turn>,
    pub tools: Vec<String>,
}

/// A mock provider that streams pre-configured rounds of fragments for testing
pub struct MockProvider {
    rounds: Arc<Mutex<Vec<Round>>>,
    repeat: Option<Round>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of rounds
    pub fn new(rounds: Vec<Vec<ResponseFragment>>) -> Self {
        Self::with_results(
            rounds
                .into_iter()
                .map(|round| round.into_iter().map(Ok).collect())
                .collect(),
        )
    }

    /// Rounds that may contain failures mid-stream
    pub fn with_results(rounds: Vec<Round>) -> Self {
        Self {
            rounds: Arc::new(Mutex::new(rounds)),
            repeat: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer every call with the same round
    pub fn repeating(round: Vec<ResponseFragment>) -> Self {
        let mut provider = Self::new(vec![]);
        provider.repeat = Some(round.into_iter().map(Ok).collect());
        provider
    }

    /// Handle on the requests received by each call
    pub fn calls(&self) -> Arc<Mutex<Vec<RecordedCall>>> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn stream(
        &self,
        input: &Turn,
        history: &[Turn],
        tools: &[Tool],
        _config: &GenerationConfig,
    ) -> AgentResult<FragmentStream> {
        self.calls.lock().unwrap().push(RecordedCall {
            input: input.clone(),
            history: history.to_vec(),
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        });
        let round = match &self.repeat {
            Some(round) => round.clone(),
            None => {
                let mut rounds = self.rounds.lock().unwrap();
                if rounds.is_empty() {
                    return Err(AgentError::Transport("no more scripted rounds".to_string()));
                }
                rounds.remove(0)
            }
        };
        Ok(Box::pin(futures::stream::iter(round)))
    }
}
