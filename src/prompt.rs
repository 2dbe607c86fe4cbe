//! Prompt assembly
//!
//! Builds the single instruction string sent to the completion provider from
//! retrieved context, a bounded window of conversation history, and the
//! current query. Pure and synchronous; no side effects.

use crate::index::RetrievalResult;
use serde::{Deserialize, Serialize};

/// Who produced a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Assistant,
}

/// One turn of the active conversation, owned by the caller
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

/// Prompt assembly configuration
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    /// How many trailing turns of history to consider
    history_window: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self { history_window: 10 }
    }
}

impl PromptBuilder {
    pub fn new(history_window: usize) -> Self {
        Self { history_window }
    }

    /// Assemble the full prompt.
    ///
    /// Context chunks are rendered in ranked order. Of the last
    /// `history_window` turns, the most recent one is excluded: the caller
    /// appends the current query to the session log before building, and
    /// rendering it again would duplicate the question.
    pub fn build(
        &self,
        query: &str,
        retrieved: &[RetrievalResult<'_>],
        history: &[ConversationTurn],
    ) -> String {
        let mut prompt = String::new();

        prompt.push_str(
            "Based on the following context from an uploaded document, answer the \
             user's question.\n\n",
        );

        prompt.push_str("CONTEXT:\n");
        if retrieved.is_empty() {
            prompt.push_str("(no relevant document context was found for this question)\n");
        } else {
            for (i, result) in retrieved.iter().enumerate() {
                if i > 0 {
                    prompt.push('\n');
                }
                prompt.push_str(&format!(
                    "Page {}: {}\n",
                    result.chunk.page_number, result.chunk.content
                ));
            }
        }

        let rendered = self.rendered_history(history);
        if !rendered.is_empty() {
            prompt.push_str("\nCONVERSATION SO FAR:\n");
            for turn in rendered {
                let label = match turn.role {
                    Role::Human => "User",
                    Role::Assistant => "Assistant",
                };
                prompt.push_str(&format!("{}: {}\n", label, turn.text.trim()));
            }
        }

        prompt.push_str(&format!("\nQUESTION: {}\n\n", query));
        prompt.push_str(
            "Answer based only on the provided context. If the context does not \
             contain enough information, or the question is unrelated to the \
             document, say so politely or respond conversationally instead of \
             inventing an answer.",
        );

        prompt
    }

    /// The window of history that gets rendered: the last `history_window`
    /// turns minus the most recent one, with blank turns dropped.
    fn rendered_history<'a>(&self, history: &'a [ConversationTurn]) -> Vec<&'a ConversationTurn> {
        let start = history.len().saturating_sub(self.history_window);
        let window = &history[start..];
        let considered = &window[..window.len().saturating_sub(1)];
        considered
            .iter()
            .filter(|turn| !turn.text.trim().is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunk;

    fn chunk(index: usize, page: usize, content: &str) -> Chunk {
        Chunk {
            content: content.to_string(),
            index,
            page_number: page,
            start_offset: 0,
            end_offset: content.chars().count(),
            word_count: content.split_whitespace().count(),
        }
    }

    fn turn(role: Role, text: &str) -> ConversationTurn {
        ConversationTurn {
            role,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_context_rendered_in_ranked_order() {
        let a = chunk(4, 2, "Highest ranked content.");
        let b = chunk(1, 7, "Second ranked content.");
        let retrieved = vec![
            RetrievalResult {
                chunk: &a,
                score: 0.9,
            },
            RetrievalResult {
                chunk: &b,
                score: 0.4,
            },
        ];

        let prompt = PromptBuilder::default().build("What is this?", &retrieved, &[]);
        let first = prompt.find("Highest ranked content").unwrap();
        let second = prompt.find("Second ranked content").unwrap();
        assert!(first < second);
        // Scores never leak into the prompt
        assert!(!prompt.contains("0.9"));
        assert!(prompt.contains("Page 2:"));
        assert!(prompt.contains("Page 7:"));
    }

    #[test]
    fn test_query_and_instruction_present() {
        let prompt = PromptBuilder::default().build("Where is the summary?", &[], &[]);
        assert!(prompt.contains("QUESTION: Where is the summary?"));
        assert!(prompt.contains("only on the provided context"));
        assert!(prompt.contains("no relevant document context"));
    }

    #[test]
    fn test_most_recent_turn_excluded_from_history() {
        let history = vec![
            turn(Role::Human, "Earlier question"),
            turn(Role::Assistant, "Earlier answer"),
            turn(Role::Human, "Current question"),
        ];
        let prompt = PromptBuilder::default().build("Current question", &[], &history);
        assert!(prompt.contains("User: Earlier question"));
        assert!(prompt.contains("Assistant: Earlier answer"));
        // The current question appears once, as QUESTION, not in history
        assert_eq!(prompt.matches("Current question").count(), 1);
    }

    #[test]
    fn test_history_window_bounds_turns() {
        let mut history = Vec::new();
        for i in 0..30 {
            history.push(turn(Role::Human, &format!("question {}", i)));
            history.push(turn(Role::Assistant, &format!("answer {}", i)));
        }
        let prompt = PromptBuilder::new(4).build("latest", &[], &history);
        // Window of 4 minus the most recent turn leaves 3 rendered turns
        assert!(!prompt.contains("question 0"));
        assert!(!prompt.contains("answer 27"));
        assert!(prompt.contains("answer 28"));
        assert!(prompt.contains("question 29"));
    }

    #[test]
    fn test_blank_turns_dropped() {
        let history = vec![
            turn(Role::Human, "   "),
            turn(Role::Assistant, "Real answer"),
            turn(Role::Human, "Current"),
        ];
        let prompt = PromptBuilder::default().build("Current", &[], &history);
        assert!(prompt.contains("Assistant: Real answer"));
        assert!(!prompt.contains("User:   "));
    }

    #[test]
    fn test_no_history_section_when_empty() {
        let prompt = PromptBuilder::default().build("only question", &[], &[]);
        assert!(!prompt.contains("CONVERSATION SO FAR"));
    }

    #[test]
    fn test_build_is_pure() {
        let a = chunk(0, 1, "Stable content.");
        let retrieved = vec![RetrievalResult {
            chunk: &a,
            score: 0.5,
        }];
        let history = vec![turn(Role::Human, "q1"), turn(Role::Human, "q2")];
        let builder = PromptBuilder::default();
        assert_eq!(
            builder.build("q2", &retrieved, &history),
            builder.build("q2", &retrieved, &history)
        );
    }
}
