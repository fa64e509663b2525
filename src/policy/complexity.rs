//! Keyword heuristic used when the prompt complexity gate is enabled.

use once_cell::sync::Lazy;
use regex::Regex;

const COMPLEXITY_TRIGGERS: &[&str] = &[
    "analyze", "investigate", "debug", "implement", "refactor", "optimize", "understand",
    "design", "architect", "plan", "strategy", "complex", "system", "performance", "security",
    "scalability", "troubleshoot", "diagnose", "root cause", "technical debt", "code review",
    "best practices", "create", "build", "write", "add", "develop", "fix", "solve", "resolve",
    "handle", "manage", "integrate", "connect", "setup", "configure", "install", "deploy",
    "test", "validate", "verify", "check", "update", "modify", "change", "improve", "enhance",
    "extend", "expand", "scale", "migrate", "convert", "generate", "construct", "make",
    "produce", "craft",
];

const CODE_PATTERNS: &[&str] = &[
    "class", "function", "method", "algorithm", "database", "api", "endpoint", "integration",
    "authentication", "authorization", "framework", "library", "module", "component", "service",
];

const MULTI_STEP_WORDS: &[&str] = &[
    "and",
    "then",
    "also",
    "additionally",
    "furthermore",
    "moreover",
];

fn word_set(words: &[&str]) -> Regex {
    let alternation = words
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\b(?:{})", alternation)).expect("keyword alternation is valid")
}

static TRIGGERS: Lazy<Regex> = Lazy::new(|| word_set(COMPLEXITY_TRIGGERS));
static CODE: Lazy<Regex> = Lazy::new(|| word_set(CODE_PATTERNS));

static SIMPLE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^(show|list|display|print|echo|cat|ls|pwd|cd|help|\?)",
        r"^(what is|what are|how do i|can you tell me|explain briefly).*\?$",
        r"^(hi|hello|hey|thanks|thank you)",
        r"^(yes|no|ok|okay|sure|fine)$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("simple prompt pattern is valid"))
    .collect()
});

/// Whether a prompt looks like substantial analytical work
pub fn is_complex_prompt(prompt: &str) -> bool {
    let lower = prompt.trim().to_lowercase();
    if lower.is_empty() {
        return false;
    }
    if TRIGGERS.is_match(&lower) || CODE.is_match(&lower) {
        return true;
    }

    let multi_step = MULTI_STEP_WORDS
        .iter()
        .filter(|w| lower.contains(&format!(" {} ", w)))
        .count();
    if multi_step >= 2 {
        return true;
    }

    if SIMPLE.iter().any(|re| re.is_match(&lower)) {
        return false;
    }
    lower.split_whitespace().count() > 5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greetings_and_short_questions_are_simple() {
        assert!(!is_complex_prompt("hello"));
        assert!(!is_complex_prompt("thanks!"));
        assert!(!is_complex_prompt("what is a monad?"));
        assert!(!is_complex_prompt("   "));
    }

    #[test]
    fn triggers_and_code_terms_are_complex() {
        assert!(is_complex_prompt("Refactor the session module"));
        assert!(is_complex_prompt("where is the database"));
        assert!(is_complex_prompt("Please debug this"));
    }

    #[test]
    fn multi_step_language_is_complex() {
        assert!(is_complex_prompt("look at it and then also the other"));
    }

    #[test]
    fn long_prompts_default_to_complex() {
        assert!(is_complex_prompt("tell me about the history of this old repository"));
        assert!(!is_complex_prompt("tell me more"));
    }
}
