//! crates/storyflow_core/src/suggestions.rs
//!
//! The heuristic suggestion generator: turns the last exchange into a
//! short list of clickable reply chips. The server-side LLM variant
//! lives in the api service; this module is its fallback and the only
//! path that must always produce something sensible.

use crate::stage::Stage;
use regex::Regex;

/// Suggestion chips rendered per turn, at most this many.
pub const MAX_SUGGESTIONS: usize = 4;

const INTERROGATIVE_MARKERS: &[&str] = &[
    "would you",
    "do you prefer",
    "do you want",
    "which",
    "what kind",
    "how about",
    "are you",
];

/// Markers that usually precede a literal list of offered choices.
const CHOICE_LEAD_INS: &[&str] = &["prefer", "like", "want", "choose", "between", "interested in"];

/// Derives 0..=4 short reply suggestions from the latest exchange.
///
/// Tried in order: literal choices offered in the assistant's question,
/// canned sets keyed by topic keywords, then the stage's generic
/// defaults. Never fails; the worst case is the default set.
pub fn suggest_replies(stage: Stage, last_user: &str, last_assistant: &str) -> Vec<String> {
    if is_interrogative(last_assistant) {
        let choices = extract_offered_choices(last_assistant);
        if choices.len() >= 2 {
            return cap(choices);
        }
    }

    if let Some(canned) = topic_suggestions(last_user, last_assistant) {
        return cap(canned);
    }

    cap(stage_defaults(stage))
}

fn is_interrogative(text: &str) -> bool {
    let lowered = text.to_lowercase();
    text.trim_end().ends_with('?') || INTERROGATIVE_MARKERS.iter().any(|m| lowered.contains(m))
}

/// Pulls literal options out of a question like
/// "Would you prefer a medieval kingdom, a floating archipelago, or a
/// desert empire?": comma/"or"-separated bare phrases, or quoted ones.
fn extract_offered_choices(assistant_text: &str) -> Vec<String> {
    let question = assistant_text
        .split(['.', '!', '\n'])
        .find(|s| s.contains('?'))
        .unwrap_or(assistant_text);

    // Quoted options win when at least two are present.
    let quoted_re = Regex::new(r#""([^"]{2,40})""#).unwrap();
    let quoted: Vec<String> = quoted_re
        .captures_iter(question)
        .map(|c| tidy_choice(&c[1]))
        .filter(|s| !s.is_empty())
        .collect();
    if quoted.len() >= 2 {
        return quoted;
    }

    // Otherwise split the zone after the lead-in on commas and "or".
    let lowered = question.to_lowercase();
    let zone_start = CHOICE_LEAD_INS
        .iter()
        .filter_map(|m| lowered.rfind(m).map(|i| i + m.len()))
        .max()
        .unwrap_or(0);
    let zone = &question[zone_start..];

    let splitter = Regex::new(r"(?i)\s*,\s*|\s+or\s+").unwrap();
    splitter
        .split(zone)
        .map(tidy_choice)
        .filter(|part| {
            let words = part.split_whitespace().count();
            !part.is_empty() && (1..=5).contains(&words)
        })
        .collect()
}

/// Strips question punctuation and leading filler words, then
/// capitalizes the first letter so the chip reads like an answer.
fn tidy_choice(raw: &str) -> String {
    let mut s = raw.trim().trim_matches(&['?', '.', '!', ','][..]).trim();
    for article in ["a ", "an ", "the ", "something ", "maybe "] {
        if s.len() > article.len() && s.to_lowercase().starts_with(article) {
            s = &s[article.len()..];
            break;
        }
    }
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn topic_suggestions(last_user: &str, last_assistant: &str) -> Option<Vec<String>> {
    let haystack = format!(
        "{} {}",
        last_user.to_lowercase(),
        last_assistant.to_lowercase()
    );

    let library: &[(&[&str], &[&str])] = &[
        (
            &["protagonist", "main character", "hero"],
            &[
                "A reluctant hero",
                "A cunning outsider",
                "Someone ordinary pulled into events",
                "Let's brainstorm together",
            ],
        ),
        (
            &["magic"],
            &[
                "Subtle, rare magic",
                "Magic with a steep price",
                "Everyday magic woven into life",
                "No magic at all",
            ],
        ),
        (
            &["conflict", "antagonist", "villain"],
            &[
                "A looming war",
                "A rivalry turned bitter",
                "A secret that could ruin everything",
            ],
        ),
        (
            &["tone", "mood"],
            &[
                "Dark and brooding",
                "Hopeful with dark edges",
                "Lighthearted adventure",
                "Bittersweet",
            ],
        ),
        (
            &["region", "geography", "landscape"],
            &[
                "Windswept coastlines",
                "A dense ancient forest",
                "Mountain strongholds",
                "Sprawling river cities",
            ],
        ),
    ];

    library
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| haystack.contains(k)))
        .map(|(_, set)| set.iter().map(|s| s.to_string()).collect())
}

fn stage_defaults(stage: Stage) -> Vec<String> {
    let defaults: &[&str] = match stage {
        Stage::Genre => &["Epic fantasy", "Cozy mystery", "Science fiction", "Let's move on"],
        Stage::World => &[
            "A sprawling empire",
            "A single strange city",
            "Wild frontier lands",
            "Let's move on",
        ],
        Stage::Characters => &[
            "Start with the protagonist",
            "Create a villain",
            "Add a loyal companion",
            "Let's move on",
        ],
        Stage::Influences => &["Classic epics", "Modern thrillers", "Folk tales", "Let's move on"],
        Stage::Details => &["Tighten the plot", "Add a twist", "I'm ready to begin"],
        Stage::Ready => &["Begin the story", "Revisit the details"],
    };
    defaults.iter().map(|s| s.to_string()).collect()
}

fn cap(mut suggestions: Vec<String>) -> Vec<String> {
    suggestions.truncate(MAX_SUGGESTIONS);
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_choices_are_extracted_from_an_either_or_question() {
        let chips = suggest_replies(
            Stage::World,
            "somewhere dramatic",
            "Would you prefer a medieval kingdom, a floating archipelago, or a desert empire?",
        );
        assert_eq!(
            chips,
            vec!["Medieval kingdom", "Floating archipelago", "Desert empire"]
        );
    }

    #[test]
    fn quoted_choices_win_when_present() {
        let chips = suggest_replies(
            Stage::Genre,
            "",
            r#"Which speaks to you: "grimdark" or "hopepunk"?"#,
        );
        assert_eq!(chips, vec!["Grimdark", "Hopepunk"]);
    }

    #[test]
    fn topic_keywords_select_a_canned_set() {
        let chips = suggest_replies(
            Stage::World,
            "I want magic everywhere",
            "Tell me more about how it works.",
        );
        assert_eq!(chips[0], "Subtle, rare magic");
        assert!(chips.len() <= MAX_SUGGESTIONS);
    }

    #[test]
    fn plain_statements_fall_back_to_stage_defaults() {
        let chips = suggest_replies(Stage::Details, "hm", "Noted. Anything else to adjust?");
        assert!(chips.contains(&"I'm ready to begin".to_string()));
    }

    #[test]
    fn never_more_than_four_chips() {
        for stage in Stage::ALL {
            assert!(suggest_replies(stage, "", "").len() <= MAX_SUGGESTIONS);
        }
    }
}
