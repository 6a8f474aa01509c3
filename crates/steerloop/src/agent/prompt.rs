//! Instruction assembly.
//!
//! [`SystemPromptBuilder`] joins headed sections; [`build_chat_instructions`]
//! uses it to render the admin overrides into a chat-mode prompt.

use super::overrides::{AdminOverrides, CitationFormat, ResponseStyle};
use super::policy::FORCE_TEXT_INSTRUCTION;
use chrono::NaiveDate;

/// Builder for multi-section instructions.
///
/// Sections are joined with double newlines. Empty sections are skipped.
///
/// ```
/// use steerloop::agent::prompt::SystemPromptBuilder;
///
/// let prompt = SystemPromptBuilder::new("You are a support agent.")
///     .section("Context", "Today is Monday.")
///     .section_if(false, "Hidden", || "never rendered".into())
///     .section_opt("Missing", None::<String>)
///     .build();
///
/// assert!(prompt.contains("## Context"));
/// assert!(!prompt.contains("Hidden"));
/// assert!(!prompt.contains("## Missing"));
/// ```
pub struct SystemPromptBuilder {
    sections: Vec<String>,
}

impl SystemPromptBuilder {
    /// Start with a preamble, included as-is.
    pub fn new(preamble: impl Into<String>) -> Self {
        let preamble = preamble.into();
        Self {
            sections: if preamble.is_empty() {
                Vec::new()
            } else {
                vec![preamble]
            },
        }
    }

    /// Append a `## heading` section. Skipped if `content` is blank.
    pub fn section(mut self, heading: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.trim().is_empty() {
            self.sections.push(format!("## {heading}\n\n{content}"));
        }
        self
    }

    /// Append a section only when `condition` holds; `content_fn` runs lazily.
    pub fn section_if(
        self,
        condition: bool,
        heading: &str,
        content_fn: impl FnOnce() -> String,
    ) -> Self {
        if condition {
            self.section(heading, content_fn())
        } else {
            self
        }
    }

    /// Append a section only if the content is `Some`.
    pub fn section_opt(self, heading: &str, content: Option<impl Into<String>>) -> Self {
        match content {
            Some(c) => self.section(heading, c),
            None => self,
        }
    }

    /// Append raw text without a heading. Skipped if blank.
    pub fn raw(mut self, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.trim().is_empty() {
            self.sections.push(content);
        }
        self
    }

    pub fn build(self) -> String {
        self.sections.join("\n\n")
    }
}

fn style_guidance(style: ResponseStyle) -> &'static str {
    match style {
        ResponseStyle::Concise => "Answer in as few words as accuracy allows. Prefer short lists.",
        ResponseStyle::Balanced => {
            "Give a complete answer with the key details and skip tangents."
        }
        ResponseStyle::Detailed => {
            "Answer thoroughly: explain reasoning, cover edge cases, include examples."
        }
    }
}

fn citation_guidance(format: CitationFormat) -> Option<&'static str> {
    match format {
        CitationFormat::Inline => Some("Cite sources inline as markdown links next to the claim."),
        CitationFormat::Footnotes => {
            Some("Cite sources as numbered footnotes listed at the end of the answer.")
        }
        CitationFormat::None => None,
    }
}

fn language_guidance(language: &str) -> String {
    if language.trim().is_empty() || language.eq_ignore_ascii_case("auto") {
        "Reply in the language the user wrote in.".to_string()
    } else {
        format!("Reply in {language}.")
    }
}

/// Render chat-mode instructions for today's date.
pub fn build_chat_instructions(base: &str, overrides: &AdminOverrides) -> String {
    build_chat_instructions_on(base, overrides, chrono::Utc::now().date_naive())
}

/// Render chat-mode instructions for a fixed date.
pub fn build_chat_instructions_on(
    base: &str,
    overrides: &AdminOverrides,
    date: NaiveDate,
) -> String {
    SystemPromptBuilder::new(base)
        .section("Current date", date.format("%Y-%m-%d").to_string())
        .section("Response style", style_guidance(overrides.response_style))
        .section("Language", language_guidance(&overrides.language))
        .section_opt("Searching", overrides.search_instructions.as_deref())
        .section_opt("Citations", citation_guidance(overrides.citation_format))
        .section_opt("Additional instructions", overrides.additional_prompt.as_deref())
        .build()
}

/// Instructions for a tools-disabled step.
pub fn with_force_text_instruction(instructions: &str) -> String {
    SystemPromptBuilder::new(instructions)
        .raw(FORCE_TEXT_INSTRUCTION)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
    }

    #[test]
    fn sections_use_heading_prefix() {
        let prompt = SystemPromptBuilder::new("Preamble")
            .section("Context", "Some context")
            .section("Empty", "  ")
            .build();
        assert_eq!(prompt, "Preamble\n\n## Context\n\nSome context");
    }

    #[test]
    fn empty_preamble_is_dropped() {
        let prompt = SystemPromptBuilder::new("").raw("only").build();
        assert_eq!(prompt, "only");
    }

    #[test]
    fn default_overrides_render_core_sections() {
        let prompt = build_chat_instructions_on("You help.", &AdminOverrides::default(), date());
        assert!(prompt.starts_with("You help."));
        assert!(prompt.contains("## Current date\n\n2026-03-14"));
        assert!(prompt.contains("language the user wrote in"));
        assert!(prompt.contains("## Citations"));
        assert!(!prompt.contains("## Searching"));
        assert!(!prompt.contains("## Additional instructions"));
    }

    #[test]
    fn overrides_render_optional_sections() {
        let overrides = AdminOverrides {
            response_style: ResponseStyle::Concise,
            language: "French".into(),
            search_instructions: Some("Prefer official docs.".into()),
            citation_format: CitationFormat::None,
            additional_prompt: Some("Never promise release dates.".into()),
            ..Default::default()
        };
        let prompt = build_chat_instructions_on("", &overrides, date());
        assert!(prompt.starts_with("## Current date"));
        assert!(prompt.contains("Reply in French."));
        assert!(prompt.contains("## Searching\n\nPrefer official docs."));
        assert!(!prompt.contains("## Citations"));
        assert!(prompt.ends_with("Never promise release dates."));
    }

    #[test]
    fn force_text_instruction_is_appended() {
        let out = with_force_text_instruction("Base.");
        assert!(out.starts_with("Base.\n\n"));
        assert!(out.ends_with(FORCE_TEXT_INSTRUCTION));
    }
}
