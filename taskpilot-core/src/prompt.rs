use crate::agent_output::{response_schema, schema_name};
use crate::llm::AgentPrompt;
use crate::model::{AgentStage, Artifact, ArtifactBody, Clarification, WorkItem};

/// System prompt for a stage: the shared contract followed by the stage brief.
pub fn get_system_prompt(stage: AgentStage) -> String {
    let brief = match stage {
        AgentStage::ProductDesign => include_str!("../prompts/product_design.txt"),
        AgentStage::TechDesign => include_str!("../prompts/tech_design.txt"),
        AgentStage::BugInvestigation => include_str!("../prompts/bug_investigation.txt"),
        AgentStage::Implementation => include_str!("../prompts/implementation.txt"),
        AgentStage::PrReview => include_str!("../prompts/pr_review.txt"),
    };
    format!("{}\n{}", include_str!("../prompts/common.txt"), brief)
}

/// The most recent artifact of each agent, in the order the agents ran.
fn latest_per_agent(artifacts: &[Artifact]) -> Vec<&Artifact> {
    let mut latest: Vec<&Artifact> = Vec::new();
    for artifact in artifacts {
        match latest.iter_mut().find(|a| a.agent == artifact.agent) {
            Some(slot) if slot.created_at <= artifact.created_at => *slot = artifact,
            Some(_) => {}
            None => latest.push(artifact),
        }
    }
    latest
}

fn render_artifact(artifact: &Artifact) -> String {
    match &artifact.body {
        ArtifactBody::Design { document } => document.clone(),
        ArtifactBody::Implementation {
            summary,
            diff,
            commit_message,
        } => format!(
            "Summary: {}\nCommit message: {}\n\nDIFF BEGINS:\n{}\nDIFF ENDS",
            summary, commit_message, diff
        ),
        ArtifactBody::Review {
            verdict,
            summary,
            comments,
        } => {
            let mut text = format!("Verdict: {:?}\n{}\n", verdict, summary);
            for comment in comments {
                match (&comment.path, comment.line) {
                    (Some(path), Some(line)) => {
                        text.push_str(&format!("- {}:{}: {}\n", path, line, comment.body))
                    }
                    (Some(path), None) => text.push_str(&format!("- {}: {}\n", path, comment.body)),
                    _ => text.push_str(&format!("- {}\n", comment.body)),
                }
            }
            text
        }
    }
}

/// Create the user prompt for one agent run.
pub fn create_user_prompt(
    stage: AgentStage,
    item: &WorkItem,
    artifacts: &[Artifact],
    clarifications: &[Clarification],
) -> String {
    let mut user_prompt = format!(
        "WORK ITEM ({}): {}\n\n{}\n",
        item.kind, item.title, item.description
    );

    for artifact in latest_per_agent(artifacts) {
        // The agent's own previous attempt is only useful alongside feedback.
        if artifact.agent == stage && item.feedback.is_none() {
            continue;
        }
        user_prompt.push_str(&format!(
            "\n=== {} OUTPUT ===\n\n{}\n",
            artifact.agent.display_name().to_uppercase(),
            render_artifact(artifact)
        ));
    }

    if let Some(feedback) = &item.feedback {
        user_prompt.push_str("\nFEEDBACK ON THE PREVIOUS ATTEMPT:\n");
        user_prompt.push_str(feedback);
        user_prompt.push('\n');
    }

    let answered: Vec<_> = clarifications
        .iter()
        .filter_map(|c| c.answer().map(|answer| (c, answer)))
        .collect();
    if !answered.is_empty() {
        user_prompt.push_str("\nANSWERED QUESTIONS:\n");
        for (clarification, answer) in answered {
            user_prompt.push_str(&format!(
                "\nQ: {}\nA: {}\n",
                clarification.question, answer
            ));
        }
    }

    user_prompt
}

/// Render the full request for `stage`, including its output schema.
pub fn build_agent_prompt(
    stage: AgentStage,
    item: &WorkItem,
    artifacts: &[Artifact],
    clarifications: &[Clarification],
) -> AgentPrompt {
    AgentPrompt {
        system: get_system_prompt(stage),
        user: create_user_prompt(stage, item, artifacts, clarifications),
        schema_name: schema_name(stage),
        schema: response_schema(stage),
    }
}
