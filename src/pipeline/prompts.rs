//! Fixed instructions for each pipeline stage.

use serde_json::json;

use super::complexity::ComplexityTier;
use crate::llm::FunctionDeclaration;

pub const SUFFICIENCY_FUNCTION: &str = "evaluate_context_sufficiency";

pub const SUFFICIENCY_SYSTEM: &str = "You are an expert at evaluating context sufficiency for LLM prompts. \
Analyze the task and available context to determine if additional information is needed.";

pub const RESEARCH_SYSTEM: &str = "You are a research assistant. Search for and synthesize relevant information \
to help complete the context for the given task.";

const SIMPLE_SYSTEM: &str = "You are an expert prompt engineer. Rewrite the user's request as a single clear, \
direct prompt for an LLM.

Guidelines:
- Keep it short: a few sentences at most
- State exactly what is being asked and any obvious constraint
- Do not add headings, sections or role-play scaffolding
- Output only the rewritten prompt";

const MEDIUM_SYSTEM: &str = "You are an expert prompt engineer. Transform the user's task description and the \
attached context into an effective, self-contained prompt for an LLM.

Guidelines:
1. Open with one sentence stating the goal
2. Weave in the relevant facts from the attached context; quote code or data only where it matters
3. Make implicit requirements explicit
4. Close with what a good answer should look like
5. Use light structure (short paragraphs or a brief list), no heavy section scaffolding
6. Output only the prompt";

const COMPLEX_SYSTEM: &str = "You are an expert prompt engineer. Transform the user's task description, attached \
files and web research into a highly effective, comprehensive prompt for an LLM.

Build the prompt from these five components, in this order:
1. Role/persona: the expertise the answering model should adopt for this task.
2. Task/instruction: precisely what must be done, with implicit requirements made explicit.
3. Context: everything the model needs, drawn from the tagged input sections:
   - <user_prompt>: the user's own words; preserve their intent and constraints
   - <file_data>: attached files, screenshots and page extracts; keep code and technical details exact and properly formatted
   - <web_research>: findings gathered from the web; include only what is relevant
4. Examples (optional): include a short illustrative example only when it clarifies the expected result.
5. Output format: the structure, length and style the answer must follow, plus any constraints.

Rules for your output:
- Write the prompt as natural, flowing instructions addressed to the answering model.
- Do NOT include the component labels (\"Role/persona\", \"Task/instruction\", \"Context\", \"Examples\", \"Output format\") \
or the input tags (<user_prompt>, <file_data>, <web_research>) in the prompt you produce. They are scaffolding for you, not part of the result.
- The prompt must be self-contained.
- Output only the prompt.";

pub fn sufficiency_function() -> FunctionDeclaration {
    FunctionDeclaration {
        name: SUFFICIENCY_FUNCTION.into(),
        description: "Evaluates whether the provided context is sufficient to optimize the prompt for the given task".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "is_sufficient": {
                    "type": "boolean",
                    "description": "Whether the context is sufficient for the task"
                },
                "confidence": {
                    "type": "number",
                    "description": "Confidence level from 0 to 1"
                },
                "reasoning": {
                    "type": "string",
                    "description": "Explanation of the sufficiency determination"
                },
                "suggested_queries": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Search queries to gather missing information (only if insufficient)"
                },
                "missing_aspects": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Specific aspects of information that are missing"
                }
            },
            "required": ["is_sufficient", "confidence", "reasoning"]
        }),
    }
}

pub fn sufficiency_prompt(task_description: &str, digest: &str) -> String {
    format!(
        "Task/Issue: {task_description}\n\nAvailable Context:\n{digest}\n\n\
Evaluate if this context is sufficient to create an optimized prompt for the task.\n"
    )
}

pub fn research_prompt(task_description: &str, missing_aspects: &[String]) -> String {
    format!(
        "Task: {task_description}\nMissing Aspects: {}\n\n\
Search the web and gather relevant information to fill the gaps in the context.\n\
Provide a comprehensive summary of findings.\n",
        missing_aspects.join(", ")
    )
}

pub fn synthesis_system(tier: ComplexityTier) -> &'static str {
    match tier {
        ComplexityTier::Simple => SIMPLE_SYSTEM,
        ComplexityTier::Medium => MEDIUM_SYSTEM,
        ComplexityTier::Complex => COMPLEX_SYSTEM,
    }
}

pub fn synthesis_prompt(tier: ComplexityTier, task_description: &str, full_context: &str, research: &str) -> String {
    match tier {
        ComplexityTier::Simple => format!("Task: {task_description}\n\nRewrite this as an optimized prompt.\n"),
        ComplexityTier::Medium => {
            let mut out = format!("Original Task: {task_description}\n\nAvailable Context:\n{full_context}\n");
            if !research.is_empty() {
                out.push_str(&format!("\nAdditional Research:\n{research}\n"));
            }
            out.push_str("\nCreate an optimized prompt that incorporates the relevant context.\n");
            out
        }
        ComplexityTier::Complex => format!(
            "<user_prompt>\n{task_description}\n</user_prompt>\n\n\
<file_data>\n{full_context}\n</file_data>\n\n\
<web_research>\n{}\n</web_research>\n\n\
Create an optimized, comprehensive prompt that incorporates all relevant context.\n",
            if research.is_empty() { "(none)" } else { research }
        ),
    }
}
