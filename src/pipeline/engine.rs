use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::Deserialize;
use uuid::Uuid;

use super::complexity::{classify, ComplexityTier};
use super::prompts;
use crate::context;
use crate::error::{LlmError, OptimizeError};
use crate::events::{EventBus, OptimizationEvent};
use crate::llm::{FunctionCall, GenerateOptions, GenerativeModel, TEXT_RESPONSE};
use crate::session::{NewOptimizationResult, OptimizationResult, Session};
use crate::storage::SessionRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    CheckingSufficiency,
    ResearchingWeb,
    Synthesizing,
    Persisted,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Idle => "idle",
            PipelineStage::CheckingSufficiency => "checking_sufficiency",
            PipelineStage::ResearchingWeb => "researching_web",
            PipelineStage::Synthesizing => "synthesizing",
            PipelineStage::Persisted => "persisted",
        }
    }
}

/// The model's verdict on whether the attached context is enough.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SufficiencyResult {
    pub is_sufficient: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub suggested_queries: Option<Vec<String>>,
    #[serde(default)]
    pub missing_aspects: Option<Vec<String>>,
}

impl SufficiencyResult {
    /// A plain-text reply carries no verdict and counts as insufficient.
    pub fn from_call(call: FunctionCall) -> Result<Self, LlmError> {
        if call.name == TEXT_RESPONSE {
            let text = call.args.get("text").and_then(|v| v.as_str()).unwrap_or_default();
            return Ok(Self {
                is_sufficient: false,
                confidence: 0.0,
                reasoning: text.to_string(),
                suggested_queries: None,
                missing_aspects: None,
            });
        }
        let mut result: Self = serde_json::from_value(call.args).map_err(|e| LlmError::Decode(e.to_string()))?;
        result.confidence = result.confidence.clamp(0.0, 1.0);
        Ok(result)
    }

    pub fn queries(&self) -> Vec<String> {
        self.suggested_queries.clone().unwrap_or_default()
    }

    pub fn missing(&self) -> &[String] {
        self.missing_aspects.as_deref().unwrap_or_default()
    }
}

/// Runs sufficiency check, optional web research and synthesis for one
/// session, publishing progress on the event bus.
pub struct Optimizer {
    repo: Arc<dyn SessionRepository>,
    model: Arc<dyn GenerativeModel>,
    events: Arc<EventBus>,
    in_flight: Mutex<HashSet<Uuid>>,
}

struct RunGuard<'a> {
    in_flight: &'a Mutex<HashSet<Uuid>>,
    session_id: Uuid,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.session_id);
    }
}

impl Optimizer {
    pub fn new(repo: Arc<dyn SessionRepository>, model: Arc<dyn GenerativeModel>, events: Arc<EventBus>) -> Self {
        Self { repo, model, events, in_flight: Mutex::new(HashSet::new()) }
    }

    pub fn repo(&self) -> &Arc<dyn SessionRepository> {
        &self.repo
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    fn claim(&self, session_id: Uuid) -> Result<RunGuard<'_>, OptimizeError> {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(session_id) {
            return Err(OptimizeError::OptimizationInProgress(session_id));
        }
        Ok(RunGuard { in_flight: &self.in_flight, session_id })
    }

    #[tracing::instrument(skip_all, fields(session_id = %session_id))]
    pub async fn optimize(&self, session_id: Uuid) -> Result<OptimizationResult, OptimizeError> {
        let _guard = self.claim(session_id)?;
        let started = Instant::now();
        metrics::counter!("optimization_runs_total").increment(1);

        let mut stage = PipelineStage::Idle;
        match self.run_stages(session_id, &mut stage).await {
            Ok(result) => {
                metrics::histogram!("optimization_duration_seconds").record(started.elapsed().as_secs_f64());
                tracing::info!(result_id = %result.id, web = result.used_web_research, "optimization complete");
                self.events
                    .publish(OptimizationEvent::OptimizationComplete { session_id, result: result.clone() })
                    .await;
                Ok(result)
            }
            Err(err) => {
                tracing::error!(stage = stage.as_str(), error = %err, "optimization failed");
                metrics::counter!("optimization_failures_total", "stage" => stage.as_str()).increment(1);
                self.events
                    .publish(OptimizationEvent::OptimizationError { session_id, error: err.to_string() })
                    .await;
                Err(err)
            }
        }
    }

    async fn run_stages(&self, session_id: Uuid, stage: &mut PipelineStage) -> Result<OptimizationResult, OptimizeError> {
        let session = self.repo.load_session(session_id).await?;

        *stage = PipelineStage::CheckingSufficiency;
        self.status(session_id, "Checking context sufficiency...").await;
        let sufficiency = self.check_sufficiency(&session).await?;
        tracing::info!(
            sufficient = sufficiency.is_sufficient,
            confidence = sufficiency.confidence,
            "sufficiency evaluated"
        );

        let mut research = String::new();
        if !sufficiency.is_sufficient {
            *stage = PipelineStage::ResearchingWeb;
            self.status(session_id, "Gathering additional information from the web...").await;
            research = self.research(&session, &sufficiency).await?;
            metrics::counter!("optimization_web_research_total").increment(1);
        }

        *stage = PipelineStage::Synthesizing;
        self.status(session_id, "Generating optimized prompt...").await;
        let tier = classify(&session.task_description, &session.context_items, &research);
        tracing::info!(tier = tier.as_str(), "synthesizing");
        let optimized_prompt = self.synthesize(&session, tier, &research).await?;

        let result = self
            .repo
            .append_optimization_result(session_id, NewOptimizationResult {
                optimized_prompt,
                used_web_research: !sufficiency.is_sufficient,
                search_queries: sufficiency.queries(),
            })
            .await?;
        *stage = PipelineStage::Persisted;
        Ok(result)
    }

    async fn status(&self, session_id: Uuid, status: &str) {
        self.events
            .publish(OptimizationEvent::OptimizationStatus { session_id, status: status.to_string() })
            .await;
    }

    async fn check_sufficiency(&self, session: &Session) -> Result<SufficiencyResult, LlmError> {
        let prompt = prompts::sufficiency_prompt(&session.task_description, &context::digest(&session.context_items));
        let call = self
            .model
            .generate_content_with_functions(&prompt, vec![prompts::sufficiency_function()], Some(prompts::SUFFICIENCY_SYSTEM))
            .await?;
        SufficiencyResult::from_call(call)
    }

    async fn research(&self, session: &Session, sufficiency: &SufficiencyResult) -> Result<String, LlmError> {
        let prompt = prompts::research_prompt(&session.task_description, sufficiency.missing());
        let answer = self
            .model
            .generate_content_with_grounded_search(&prompt, Some(prompts::RESEARCH_SYSTEM))
            .await?;
        if let Some(queries) = answer.grounding_metadata.as_ref().and_then(|m| m.get("webSearchQueries")) {
            tracing::info!(%queries, "grounded search queries");
        }
        Ok(answer.text)
    }

    async fn synthesize(&self, session: &Session, tier: ComplexityTier, research: &str) -> Result<String, LlmError> {
        let full = context::full(&session.context_items);
        let prompt = prompts::synthesis_prompt(tier, &session.task_description, &full, research);
        let options = GenerateOptions {
            system_instruction: Some(prompts::synthesis_system(tier).to_string()),
            ..Default::default()
        };
        self.model.generate_content(&prompt, options).await
    }
}
