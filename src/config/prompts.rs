//! Advisor personas and their system directives
//!
//! Each advisor persona has a fixed system directive. Built-in directives
//! are used unless a TOML file named after the persona exists in the
//! configured prompts directory.
//!
//! # Example Prompt File (`study_planner.toml`)
//!
//! ```toml
//! [persona]
//! name = "Study Planner"
//! description = "Structured, actionable application planning"
//!
//! [system_prompt]
//! content = """
//! You are Qihang's study-abroad planner...
//! """
//!
//! [examples]
//! questions = ["Which UK programmes fit a 3.5 GPA?"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// A persona/prompt template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Persona metadata
    pub persona: PersonaInfo,

    /// The system prompt
    pub system_prompt: SystemPrompt,

    /// Example questions this persona handles well
    #[serde(default)]
    pub examples: PromptExamples,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaInfo {
    pub name: String,

    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPrompt {
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptExamples {
    #[serde(default)]
    pub questions: Vec<String>,
}

impl PromptTemplate {
    /// Load a template directly from a file path
    pub async fn load_from_file(path: &Path) -> Result<Self, PromptError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| PromptError::IoError(format!("{}: {}", path.display(), e)))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, PromptError> {
        let template: PromptTemplate =
            toml::from_str(content).map_err(|e| PromptError::ParseError(e.to_string()))?;

        if template.system_prompt.content.trim().is_empty() {
            return Err(PromptError::ParseError(format!(
                "persona '{}' has an empty system prompt",
                template.persona.name
            )));
        }
        Ok(template)
    }
}

/// Which advisor answers the conversation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    #[default]
    #[serde(alias = "planner")]
    StudyPlanner,
    #[serde(alias = "consultant")]
    StudyConsultant,
}

impl AgentKind {
    pub const ALL: [AgentKind; 2] = [AgentKind::StudyPlanner, AgentKind::StudyConsultant];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::StudyPlanner => "study_planner",
            AgentKind::StudyConsultant => "study_consultant",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "study_planner" | "planner" => Some(AgentKind::StudyPlanner),
            "study_consultant" | "consultant" => Some(AgentKind::StudyConsultant),
            _ => None,
        }
    }

    fn builtin_directive(&self) -> &'static str {
        match self {
            AgentKind::StudyPlanner => builtin::STUDY_PLANNER,
            AgentKind::StudyConsultant => builtin::STUDY_CONSULTANT,
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved system directives, one per advisor persona. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Directives {
    planner: String,
    consultant: String,
}

impl Default for Directives {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Directives {
    pub fn builtin() -> Self {
        Self {
            planner: builtin::STUDY_PLANNER.to_string(),
            consultant: builtin::STUDY_CONSULTANT.to_string(),
        }
    }

    /// Load overrides from `{dir}/{agent}.toml`, falling back to built-ins
    /// for personas without a file.
    pub async fn load(dir: Option<&Path>) -> Result<Self, PromptError> {
        let mut directives = Self::builtin();
        let Some(dir) = dir else {
            return Ok(directives);
        };

        for agent in AgentKind::ALL {
            let path = dir.join(format!("{}.toml", agent.as_str()));
            if !fs::try_exists(&path).await.unwrap_or(false) {
                tracing::debug!("No persona file for {}, using built-in directive", agent);
                continue;
            }
            let template = PromptTemplate::load_from_file(&path).await?;
            tracing::info!("Loaded persona '{}' for {}", template.persona.name, agent);
            directives.set(agent, template.system_prompt.content);
        }

        Ok(directives)
    }

    pub fn set(&mut self, agent: AgentKind, directive: impl Into<String>) {
        match agent {
            AgentKind::StudyPlanner => self.planner = directive.into(),
            AgentKind::StudyConsultant => self.consultant = directive.into(),
        }
    }

    pub fn get(&self, agent: AgentKind) -> &str {
        match agent {
            AgentKind::StudyPlanner => &self.planner,
            AgentKind::StudyConsultant => &self.consultant,
        }
    }

    pub fn is_builtin(&self, agent: AgentKind) -> bool {
        self.get(agent) == agent.builtin_directive()
    }
}

/// Errors from prompt loading
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Built-in prompts that don't require files
pub mod builtin {
    /// First transcript message shown to a new user; display only
    pub const GREETING: &str = "Hello! I'm Qihang, your AI study-abroad advisor.\n\n\
I can help you:\n\
• Recommend schools and programmes that fit your background\n\
• Look up admission requirements and deadlines\n\
• Match you with senior students who can mentor you\n\
• Suggest relevant advisory services\n\
• Build an application timeline\n\
• Give advice on essays and interviews\n\n\
Tell me about your study-abroad plans and I'll do my best to help!";

    pub const STUDY_PLANNER: &str = r#"You are Qihang's professional study-abroad planner.

Answer in a structured, actionable way:
1. Summarize the student's goal and constraints in one sentence
2. Recommend concrete schools, programmes or next steps
3. Give a timeline with deadlines where relevant
4. Point out risks and how to mitigate them

Never invent admission statistics. If you are unsure, say so and suggest where to verify."#;

    pub const STUDY_CONSULTANT: &str = r#"You are Qihang's professional study-abroad consultant.

Answer questions accurately, clearly and in a friendly tone. Keep answers focused on
what the student asked, explain unfamiliar terms, and recommend talking to a mentor
when a question needs first-hand experience."#;
}
