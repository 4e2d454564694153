use crate::types::{WorkflowDefinition, WorkflowTask};
use async_trait::async_trait;
use inkflow_core::{InkflowError, InkflowResult};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

/// Parameter overriding the agent id used for planning steps.
pub const PLANNER_AGENT_PARAM: &str = "planner_agent";
/// Parameter overriding the agent id used for writing steps.
pub const WRITER_AGENT_PARAM: &str = "writer_agent";
/// Parameter overriding the agent id used for editing steps.
pub const EDITOR_AGENT_PARAM: &str = "editor_agent";

/// Agent id used for planning steps unless overridden.
pub const DEFAULT_PLANNER_AGENT: &str = "planner";
/// Agent id used for writing steps unless overridden.
pub const DEFAULT_WRITER_AGENT: &str = "writer";
/// Agent id used for editing steps unless overridden.
pub const DEFAULT_EDITOR_AGENT: &str = "editor";

/// Parameter holding the step instructions attached to every generated task.
pub const INSTRUCTIONS_PARAM: &str = "instructions";

/// Canned workflow shapes for common writing jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowTemplate {
    /// Linear chain: outline → draft → polish.
    ChapterGeneration,
    /// Fan-out: profile → {backstory, relationships}.
    CharacterDevelopment,
    /// Fan-in: {plot check, character check} → report.
    ConsistencyReview,
}

impl WorkflowTemplate {
    pub fn all() -> [WorkflowTemplate; 3] {
        [
            WorkflowTemplate::ChapterGeneration,
            WorkflowTemplate::CharacterDevelopment,
            WorkflowTemplate::ConsistencyReview,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkflowTemplate::ChapterGeneration => "chapter_generation",
            WorkflowTemplate::CharacterDevelopment => "character_development",
            WorkflowTemplate::ConsistencyReview => "consistency_review",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            WorkflowTemplate::ChapterGeneration => {
                "Outline a chapter, draft it, then polish the prose"
            }
            WorkflowTemplate::CharacterDevelopment => {
                "Build a character profile, then expand backstory and relationships in parallel"
            }
            WorkflowTemplate::ConsistencyReview => {
                "Check plot and character continuity in parallel, then write a report"
            }
        }
    }

    /// Task graph in a compact textual form, for listings.
    pub fn shape(&self) -> &'static str {
        match self {
            WorkflowTemplate::ChapterGeneration => "outline -> draft -> polish",
            WorkflowTemplate::CharacterDevelopment => {
                "character_profile -> {backstory, relationships}"
            }
            WorkflowTemplate::ConsistencyReview => {
                "{plot_check, character_check} -> consistency_report"
            }
        }
    }

    /// Build a fresh workflow definition from this template.
    ///
    /// The agent override parameters pick the executing agents; every other
    /// parameter is copied into each task alongside the step instructions.
    pub fn instantiate(&self, params: &HashMap<String, Value>) -> WorkflowDefinition {
        let planner = agent_param(params, PLANNER_AGENT_PARAM, DEFAULT_PLANNER_AGENT);
        let writer = agent_param(params, WRITER_AGENT_PARAM, DEFAULT_WRITER_AGENT);
        let editor = agent_param(params, EDITOR_AGENT_PARAM, DEFAULT_EDITOR_AGENT);

        let shared: HashMap<String, Value> = params
            .iter()
            .filter(|(k, _)| {
                ![PLANNER_AGENT_PARAM, WRITER_AGENT_PARAM, EDITOR_AGENT_PARAM].contains(&k.as_str())
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut workflow = WorkflowDefinition::new(workflow_name(self, params))
            .with_configuration("template", self.name());

        match self {
            WorkflowTemplate::ChapterGeneration => {
                let outline = workflow.add_task(step(
                    "outline",
                    &planner,
                    8,
                    OUTLINE_INSTRUCTIONS,
                    &shared,
                ));
                let draft = workflow.add_task(
                    step("draft", &writer, 6, DRAFT_INSTRUCTIONS, &shared)
                        .with_dependencies(vec![outline]),
                );
                workflow.add_task(
                    step("polish", &editor, 5, POLISH_INSTRUCTIONS, &shared)
                        .with_dependencies(vec![draft]),
                );
            }
            WorkflowTemplate::CharacterDevelopment => {
                let profile = workflow.add_task(step(
                    "character_profile",
                    &planner,
                    7,
                    PROFILE_INSTRUCTIONS,
                    &shared,
                ));
                workflow.add_task(
                    step("backstory", &writer, 5, BACKSTORY_INSTRUCTIONS, &shared)
                        .with_dependencies(vec![profile]),
                );
                workflow.add_task(
                    step(
                        "relationships",
                        &writer,
                        5,
                        RELATIONSHIPS_INSTRUCTIONS,
                        &shared,
                    )
                    .with_dependencies(vec![profile]),
                );
            }
            WorkflowTemplate::ConsistencyReview => {
                let plot = workflow.add_task(step(
                    "plot_check",
                    &editor,
                    6,
                    PLOT_CHECK_INSTRUCTIONS,
                    &shared,
                ));
                let characters = workflow.add_task(step(
                    "character_check",
                    &editor,
                    6,
                    CHARACTER_CHECK_INSTRUCTIONS,
                    &shared,
                ));
                workflow.add_task(
                    step(
                        "consistency_report",
                        &planner,
                        5,
                        REPORT_INSTRUCTIONS,
                        &shared,
                    )
                    .with_dependencies(vec![plot, characters]),
                );
            }
        }
        workflow
    }
}

impl std::fmt::Display for WorkflowTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WorkflowTemplate {
    type Err = InkflowError;

    /// Case-insensitive; `-` and `_` are interchangeable.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        WorkflowTemplate::all()
            .into_iter()
            .find(|t| t.name() == normalized)
            .ok_or_else(|| InkflowError::Validation(format!("unknown workflow template '{s}'")))
    }
}

/// Supplies extra parameters (project notes, prior chapters, character
/// sheets) to workflows created from templates.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Context parameters for `template`; keys already present in `params` win.
    async fn context_for(
        &self,
        template: WorkflowTemplate,
        params: &HashMap<String, Value>,
    ) -> InkflowResult<HashMap<String, Value>>;
}

fn agent_param(params: &HashMap<String, Value>, key: &str, default: &str) -> String {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
        .to_string()
}

fn workflow_name(template: &WorkflowTemplate, params: &HashMap<String, Value>) -> String {
    let label = match template {
        WorkflowTemplate::ChapterGeneration => "Chapter generation",
        WorkflowTemplate::CharacterDevelopment => "Character development",
        WorkflowTemplate::ConsistencyReview => "Consistency review",
    };
    match params.get("title").and_then(Value::as_str) {
        Some(title) if !title.is_empty() => format!("{label}: {title}"),
        _ => label.to_string(),
    }
}

fn step(
    task_type: &str,
    agent: &str,
    priority: u8,
    instructions: &str,
    shared: &HashMap<String, Value>,
) -> WorkflowTask {
    WorkflowTask::new(task_type, task_type, agent)
        .with_priority(priority)
        .with_parameters(shared.clone())
        .with_parameter(INSTRUCTIONS_PARAM, instructions)
}

const OUTLINE_INSTRUCTIONS: &str = "\
Produce a scene-by-scene outline for the chapter. For each scene list the \
point-of-view character, the goal, the obstacle and the turn that ends it. \
Keep continuity with the supplied context.";

const DRAFT_INSTRUCTIONS: &str = "\
Write the full chapter draft following the outline. Stay in the established \
voice and tense, and end each scene on its planned turn.";

const POLISH_INSTRUCTIONS: &str = "\
Edit the draft for rhythm, clarity and word choice. Fix continuity slips \
against the outline. Do not change plot events.";

const PROFILE_INSTRUCTIONS: &str = "\
Create a character profile: name, role in the story, appearance, goals, \
fears, voice and the arc the character should travel.";

const BACKSTORY_INSTRUCTIONS: &str = "\
Expand the profile into a backstory covering formative events that explain \
the character's goals and fears.";

const RELATIONSHIPS_INSTRUCTIONS: &str = "\
Describe the character's relationships with the existing cast: history, \
current tension and how each relationship should evolve.";

const PLOT_CHECK_INSTRUCTIONS: &str = "\
Review the manuscript for plot continuity: timeline order, cause and effect, \
dropped threads and contradictions between chapters.";

const CHARACTER_CHECK_INSTRUCTIONS: &str = "\
Review the manuscript for character continuity: names, physical details, \
knowledge each character should or should not have, and voice.";

const REPORT_INSTRUCTIONS: &str = "\
Merge the plot and character findings into one consistency report, ordered \
by severity, each item with its location and a suggested fix.";
