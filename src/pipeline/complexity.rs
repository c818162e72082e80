use serde::{Deserialize, Serialize};

use crate::session::{ContextItem, ContextItemType};

const SIMPLE_TASK_CHARS: usize = 100;
const MEDIUM_TASK_CHARS: usize = 300;
const MEDIUM_MAX_ITEMS: usize = 2;
const MEDIUM_CONTENT_CHARS: usize = 5000;

/// How much scaffolding the synthesized prompt gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityTier {
    Simple,
    Medium,
    Complex,
}

impl ComplexityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityTier::Simple => "simple",
            ComplexityTier::Medium => "medium",
            ComplexityTier::Complex => "complex",
        }
    }
}

pub fn classify(task_description: &str, items: &[ContextItem], research: &str) -> ComplexityTier {
    let task_len = task_description.chars().count();
    let research_len = research.chars().count();
    let has_files = items.iter().any(|i| i.kind == ContextItemType::File);
    let total_content = items.iter().map(|i| i.content.chars().count()).sum::<usize>() + research_len;

    if task_len < SIMPLE_TASK_CHARS && items.is_empty() && !has_files && research_len == 0 && total_content == 0 {
        ComplexityTier::Simple
    } else if task_len < MEDIUM_TASK_CHARS && items.len() <= MEDIUM_MAX_ITEMS && total_content < MEDIUM_CONTENT_CHARS {
        ComplexityTier::Medium
    } else {
        ComplexityTier::Complex
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ContextMetadata;
    use chrono::Utc;
    use uuid::Uuid;

    fn file(chars: usize) -> ContextItem {
        ContextItem {
            id: Uuid::new_v4(),
            kind: ContextItemType::File,
            content: "x".repeat(chars),
            metadata: ContextMetadata::default(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn empty_inputs_are_simple() {
        assert_eq!(classify("", &[], ""), ComplexityTier::Simple);
        assert_eq!(classify("What is a monad?", &[], ""), ComplexityTier::Simple);
    }

    #[test]
    fn research_alone_lifts_out_of_simple() {
        assert_eq!(classify("short", &[], "some findings"), ComplexityTier::Medium);
    }

    #[test]
    fn mid_sized_task_with_two_items_is_medium() {
        let task = "t".repeat(250);
        assert_eq!(classify(&task, &[file(500), file(500)], ""), ComplexityTier::Medium);
    }

    #[test]
    fn summarize_one_small_file_is_medium() {
        assert_eq!(classify("Summarize this file", &[file(50)], ""), ComplexityTier::Medium);
    }

    #[test]
    fn many_items_or_large_content_is_complex() {
        assert_eq!(classify("short", &[file(1), file(1), file(1)], ""), ComplexityTier::Complex);
        assert_eq!(classify("short", &[file(5001)], ""), ComplexityTier::Complex);
        assert_eq!(classify("short", &[file(4000)], &"r".repeat(1000)), ComplexityTier::Complex);
        assert_eq!(classify(&"t".repeat(300), &[], "r"), ComplexityTier::Complex);
    }
}
