//! Named session presets.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::session::SessionType;
use crate::settings::SessionSettings;
use crate::{Result, SessionError};

/// Intended difficulty of a template's exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

/// A reusable preset of settings, language and difficulty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub session_type: SessionType,
    pub settings: SessionSettings,
    pub language: String,
    pub difficulty: Difficulty,
    pub usage_count: u64,
    /// Running mean of review scores, 0 until rated.
    pub rating: f64,
    pub rating_count: u64,
    /// None for built-in presets.
    pub created_by: Option<String>,
}

impl SessionTemplate {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        session_type: SessionType,
        language: impl Into<String>,
        difficulty: Difficulty,
    ) -> Self {
        Self {
            id: duet_types::new_id(),
            name: name.into(),
            description: description.into(),
            session_type,
            settings: SessionSettings::for_type(session_type),
            language: language.into(),
            difficulty,
            usage_count: 0,
            rating: 0.0,
            rating_count: 0,
            created_by: None,
        }
    }

    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Folds a 1..=5 score into the running mean.
    pub fn rate(&mut self, score: u8) -> Result<()> {
        if !(1..=5).contains(&score) {
            return Err(SessionError::Validation(format!(
                "rating must be between 1 and 5, got {}",
                score
            )));
        }
        self.rating_count += 1;
        self.rating += (f64::from(score) - self.rating) / self.rating_count as f64;
        Ok(())
    }
}

/// Thread-safe template catalog.
#[derive(Debug)]
pub struct TemplateRegistry {
    templates: RwLock<HashMap<String, SessionTemplate>>,
}

impl TemplateRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            templates: RwLock::new(HashMap::new()),
        }
    }

    /// A registry holding the built-in presets.
    pub fn with_builtins() -> Self {
        let registry = Self::empty();
        for template in builtin_templates() {
            registry.insert(template);
        }
        registry
    }

    fn insert(&self, template: SessionTemplate) -> SessionTemplate {
        self.templates
            .write()
            .insert(template.id.clone(), template.clone());
        template
    }

    /// Registers a user-defined template.
    pub fn create(&self, mut template: SessionTemplate, created_by: &str) -> Result<SessionTemplate> {
        if template.name.trim().is_empty() {
            return Err(SessionError::Validation(
                "template name cannot be empty".to_string(),
            ));
        }
        template.settings.check()?;
        template.created_by = Some(created_by.to_string());
        template.usage_count = 0;
        template.rating = 0.0;
        template.rating_count = 0;

        debug!(template_id = %template.id, name = %template.name, "Template created");
        Ok(self.insert(template))
    }

    pub fn get(&self, id: &str) -> Result<SessionTemplate> {
        self.templates
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::TemplateNotFound {
                template_id: id.to_string(),
            })
    }

    /// Looks a template up by name.
    pub fn find_by_name(&self, name: &str) -> Option<SessionTemplate> {
        self.templates
            .read()
            .values()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Templates sorted by name.
    pub fn list(&self) -> Vec<SessionTemplate> {
        let mut all: Vec<_> = self.templates.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn rate(&self, id: &str, score: u8) -> Result<SessionTemplate> {
        self.update(id, |t| t.rate(score))
    }

    /// Bumps the usage count and returns the updated template.
    pub fn record_usage(&self, id: &str) -> Result<SessionTemplate> {
        self.update(id, |t| {
            t.usage_count += 1;
            Ok(())
        })
    }

    fn update<F>(&self, id: &str, f: F) -> Result<SessionTemplate>
    where
        F: FnOnce(&mut SessionTemplate) -> Result<()>,
    {
        let mut templates = self.templates.write();
        let template = templates
            .get_mut(id)
            .ok_or_else(|| SessionError::TemplateNotFound {
                template_id: id.to_string(),
            })?;
        f(template)?;
        Ok(template.clone())
    }

    pub fn len(&self) -> usize {
        self.templates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn builtin_templates() -> Vec<SessionTemplate> {
    vec![
        SessionTemplate::new(
            "Pair Programming",
            "Two developers on one problem, driver and navigator.",
            SessionType::PairProgramming,
            "javascript",
            Difficulty::Beginner,
        ),
        SessionTemplate::new(
            "Code Review",
            "Walk through a change and leave feedback.",
            SessionType::CodeReview,
            "typescript",
            Difficulty::Intermediate,
        ),
        SessionTemplate::new(
            "Debugging Session",
            "Reproduce and fix a bug together.",
            SessionType::Debugging,
            "python",
            Difficulty::Intermediate,
        ),
        SessionTemplate::new(
            "Mock Interview",
            "Timed algorithm interview practice.",
            SessionType::InterviewPractice,
            "python",
            Difficulty::Advanced,
        ),
        SessionTemplate::new(
            "Study Group",
            "Work through exercises as a group.",
            SessionType::StudyGroup,
            "javascript",
            Difficulty::Beginner,
        ),
        SessionTemplate::new(
            "Hackathon Team",
            "Build a prototype against the clock.",
            SessionType::HackathonTeam,
            "typescript",
            Difficulty::Advanced,
        ),
    ]
}
