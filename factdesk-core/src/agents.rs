//! Role-bound agents over an `LlmProvider`.
//!
//! An agent is a provider plus the instructions for one role, fixed at
//! construction. Stages never see provider details; they hand an agent a
//! context string and get back text or a parsed JSON value.

use crate::brain::LlmProvider;
use crate::config::FactdeskConfig;
use crate::error::LlmError;
use crate::model::Perspective;
use crate::types::{CompletionRequest, Message};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tracing::{Instrument, debug, info_span};

const WRITER_INSTRUCTIONS: &str = "\
You write fact-check replies for suspicious messages reported to the Cofacts database.
You receive the message, the classification already decided for it, the cited evidence
with each verifier's rationale, and any edits reviewers requested on the previous draft.

Write only the reply text, in the language of the message:
- For misinformation or true information: briefly state which parts are correct or
  incorrect and why, grounded in the cited evidence.
- For personal perspective: explain which parts are opinion and remind readers that
  opinion is not fact.
Apply every requested edit. Use a neutral, professional tone. Do not list references;
they are appended separately.";

const VERIFIER_INSTRUCTIONS: &str = "\
You verify a claim against one piece of evidence. Judge only from the evidence given:
does it support the claim, contradict it, or is it irrelevant to it? Note
misrepresentation or missing context in your rationale.

Respond with JSON only:
{\"verdict\": \"supports\" | \"contradicts\" | \"irrelevant\" | \"unknown\",
 \"confidence\": <number between 0 and 1>,
 \"rationale\": \"<one line>\"}";

const REVIEW_OUTPUT_CONTRACT: &str = "\
Respond with JSON only:
{\"disposition\": \"accept\" | \"revise\",
 \"comments\": \"<short overall comment>\",
 \"requested_edits\": [\"<one concrete edit per entry>\"]}
Use \"revise\" only for problems that must be fixed before publication.";

/// The job an agent performs in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AgentRole {
    Writer,
    Verifier,
    Reviewer(Perspective),
}

impl AgentRole {
    /// Built-in instructions for this role.
    pub fn default_instructions(&self) -> String {
        match self {
            AgentRole::Writer => WRITER_INSTRUCTIONS.to_string(),
            AgentRole::Verifier => VERIFIER_INSTRUCTIONS.to_string(),
            AgentRole::Reviewer(perspective) => {
                format!(
                    "{}\n\n{REVIEW_OUTPUT_CONTRACT}",
                    reviewer_brief(perspective)
                )
            }
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentRole::Writer => write!(f, "writer"),
            AgentRole::Verifier => write!(f, "verifier"),
            AgentRole::Reviewer(p) => write!(f, "reviewer-{p}"),
        }
    }
}

fn reviewer_brief(perspective: &Perspective) -> String {
    let focus = match perspective {
        Perspective::Progressive => {
            "a progressive perspective. Check that the reply is fair to progressive viewpoints, \
             sensitive to social justice and minority concerns, and free of language that could \
             read as discriminatory or dismissive of environmental or equality issues"
        }
        Perspective::Conservative => {
            "a conservative perspective. Check that the reply respects traditional, religious, \
             and cultural viewpoints, is fair to business and national security concerns, and \
             does not read as an attack on conservative positions"
        }
        Perspective::Centrist => {
            "a centrist perspective. Check that the reply avoids partisan language, stays focused \
             on facts rather than political positions, and keeps a measured tone that readers \
             across the spectrum can accept"
        }
        Perspective::Custom(name) => {
            return format!(
                "You proofread a fact-check reply from the \"{name}\" perspective. Check that \
                 readers who hold it would find the reply credible and fair, and flag missing \
                 context, biased sourcing, or alienating language."
            );
        }
    };
    format!(
        "You proofread a fact-check reply from {focus}. Flag missing context or biased \
         source selection."
    )
}

/// A provider bound to one role's instructions.
pub struct Agent {
    role: AgentRole,
    instructions: String,
    provider: Arc<dyn LlmProvider>,
    model: Option<String>,
    temperature: f32,
    max_tokens: usize,
}

impl Agent {
    /// Create an agent with the role's built-in instructions.
    pub fn new(role: AgentRole, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            instructions: role.default_instructions(),
            role,
            provider,
            model: None,
            temperature: 0.3,
            max_tokens: 4096,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Request a specific model instead of the provider's default.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: usize) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn role(&self) -> &AgentRole {
        &self.role
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Model name reported for this agent.
    pub fn model_name(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.model_name())
    }

    /// Send `context` under this agent's instructions and return the reply text.
    pub async fn invoke(&self, context: &str) -> Result<String, LlmError> {
        let span = info_span!("agent", role = %self.role, model = %self.model_name());
        let request = CompletionRequest {
            messages: vec![
                Message::system(self.instructions.as_str()),
                Message::user(context),
            ],
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
            model: self.model.clone(),
        };
        async {
            let response = self.provider.complete(request).await?;
            debug!(
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                total_tokens = response.usage.total(),
                "Agent call complete"
            );
            Ok::<_, LlmError>(response.text().to_owned())
        }
        .instrument(span)
        .await
    }

    /// Invoke and parse the reply as JSON, tolerating Markdown code fences.
    pub async fn invoke_json<T: DeserializeOwned>(&self, context: &str) -> Result<T, LlmError> {
        let text = self.invoke(context).await?;
        parse_json_reply(&text)
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("role", &self.role)
            .field("model", &self.model_name())
            .finish()
    }
}

/// Parse a model reply that should contain one JSON object.
///
/// Accepts bare JSON, a ```json fenced block, or JSON surrounded by prose.
pub fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let candidate = extract_json(text);
    serde_json::from_str(candidate).map_err(|e| LlmError::ResponseParse {
        message: format!("expected JSON reply: {e}"),
    })
}

fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim();
        }
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Every agent the pipeline needs, one reviewer per configured perspective.
#[derive(Debug)]
pub struct AgentSet {
    pub writer: Agent,
    pub verifier: Agent,
    pub reviewers: Vec<Agent>,
}

impl AgentSet {
    pub fn new(writer: Agent, verifier: Agent, reviewers: Vec<Agent>) -> Self {
        Self {
            writer,
            verifier,
            reviewers,
        }
    }

    /// Build every role on one provider, applying per-role model overrides.
    pub fn from_config(config: &FactdeskConfig, provider: Arc<dyn LlmProvider>) -> Self {
        let llm = &config.llm;
        let build = |role: AgentRole, model: &Option<String>| {
            Agent::new(role, Arc::clone(&provider))
                .with_model(model.clone())
                .with_sampling(llm.temperature, llm.max_tokens)
        };
        let reviewers = config
            .review
            .perspectives
            .iter()
            .map(|p| build(AgentRole::Reviewer(p.clone()), &config.agents.reviewer_model))
            .collect();
        Self {
            writer: build(AgentRole::Writer, &config.agents.writer_model),
            verifier: build(AgentRole::Verifier, &config.agents.verifier_model),
            reviewers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct VerdictReply {
        verdict: String,
    }

    #[test]
    fn test_parse_json_reply_variants() {
        let bare: VerdictReply = parse_json_reply(r#"{"verdict":"supports"}"#).unwrap();
        assert_eq!(bare.verdict, "supports");

        let fenced: VerdictReply =
            parse_json_reply("Here you go:\n```json\n{\"verdict\": \"contradicts\"}\n```\n").unwrap();
        assert_eq!(fenced.verdict, "contradicts");

        let prose: VerdictReply =
            parse_json_reply("My answer is {\"verdict\": \"irrelevant\"} as shown.").unwrap();
        assert_eq!(prose.verdict, "irrelevant");

        assert!(matches!(
            parse_json_reply::<VerdictReply>("no json here"),
            Err(LlmError::ResponseParse { .. })
        ));
    }

    #[test]
    fn test_role_display_and_instructions() {
        assert_eq!(
            AgentRole::Reviewer(Perspective::Centrist).to_string(),
            "reviewer-centrist"
        );
        let conservative = AgentRole::Reviewer(Perspective::Conservative).default_instructions();
        assert!(conservative.contains("conservative perspective"));
        assert!(conservative.contains("requested_edits"));
        let custom =
            AgentRole::Reviewer(Perspective::Custom("youth".into())).default_instructions();
        assert!(custom.contains("\"youth\" perspective"));
        assert!(AgentRole::Verifier.default_instructions().contains("\"verdict\""));
    }

    #[tokio::test]
    async fn test_invoke_sends_instructions_and_context() {
        let provider = Arc::new(MockLlmProvider::with_handler(|req| {
            Ok(format!(
                "{}|{}",
                req.system_text().is_some(),
                req.user_text()
            ))
        }));
        let agent = Agent::new(AgentRole::Writer, provider).with_instructions("be brief");
        assert_eq!(agent.instructions(), "be brief");
        assert_eq!(agent.invoke("claim text").await.unwrap(), "true|claim text");
    }

    #[tokio::test]
    async fn test_from_config_applies_model_overrides() {
        let mut config = FactdeskConfig::default();
        config.agents.verifier_model = Some("gemini-2.5-flash".into());
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let provider = Arc::new(MockLlmProvider::with_handler(move |req| {
            recorder.lock().unwrap().push(req.model.clone());
            Ok(r#"{"verdict":"supports"}"#.to_string())
        }));

        let agents = AgentSet::from_config(&config, provider);
        assert_eq!(agents.reviewers.len(), 3);
        assert_eq!(agents.verifier.model_name(), "gemini-2.5-flash");
        assert_eq!(agents.writer.model_name(), "mock-model");

        let reply: VerdictReply = agents.verifier.invoke_json("x").await.unwrap();
        assert_eq!(reply.verdict, "supports");
        agents.writer.invoke("y").await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some("gemini-2.5-flash".to_string()), None]
        );
    }
}
