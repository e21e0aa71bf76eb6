//! Brand rewriting applied to every piece of text shown to the user.
//!
//! The rewrite is driven by [`BRAND_RULES`], a plain table of patterns, so
//! it can be inspected and tested rule by rule. Rules run in table order;
//! first-person identity phrases come first so they are rewritten as a whole
//! before the bare vendor names are.
//!
//! The filter is idempotent: the brand token never matches any rule, and
//! every rule starts and ends on a word boundary, so a rewritten span cannot
//! create a new match next to it.
//!
//! Known limitation: a term split across two deltas (`"Chat"` then `"GPT"`)
//! is not rewritten by delta-level filtering.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};

use crate::errors::StreamError;

/// Brand token substituted for vendor and model names.
pub const DEFAULT_BRAND: &str = "SaintSal™";

/// What a matched span is replaced with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Replacement {
    /// The brand token.
    Brand,
    /// `I am <brand>`.
    Identity,
}

/// One row of the substitution table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterRule {
    pub name: &'static str,
    pub pattern: &'static str,
    pub replacement: Replacement,
}

pub const BRAND_RULES: &[FilterRule] = &[
    FilterRule {
        name: "identity",
        pattern: r"(?i)\bI(?:'m|’m| am) (?:ChatGPT|Claude|Gemini|GPT(?:[- ]?\d+(?:\.\d+)?)?)\b",
        replacement: Replacement::Identity,
    },
    FilterRule {
        name: "chatgpt",
        pattern: r"(?i)\bChatGPT\b",
        replacement: Replacement::Brand,
    },
    FilterRule {
        name: "gpt",
        pattern: r"(?i)\bGPT(?:[- ]?\d+(?:\.\d+)?(?:o|-?turbo| turbo|-mini|-nano)?)?\b",
        replacement: Replacement::Brand,
    },
    FilterRule {
        name: "claude",
        pattern: r"(?i)\bClaude(?:[- ]\d+(?:\.\d+)?)?(?:[- ](?:Opus|Sonnet|Haiku|Instant))?\b",
        replacement: Replacement::Brand,
    },
    FilterRule {
        name: "gemini",
        pattern: r"(?i)\bGemini(?:[- ]\d+(?:\.\d+)?)?(?:[- ](?:Pro|Ultra|Flash|Nano))?\b",
        replacement: Replacement::Brand,
    },
    FilterRule {
        name: "openai",
        pattern: r"(?i)\bOpen ?AI\b",
        replacement: Replacement::Brand,
    },
    FilterRule {
        name: "anthropic",
        pattern: r"(?i)\bAnthropic\b",
        replacement: Replacement::Brand,
    },
    FilterRule {
        name: "google",
        pattern: r"(?i)\bGoogle\b",
        replacement: Replacement::Brand,
    },
];

static COMPILED_RULES: Lazy<Vec<(FilterRule, Regex)>> = Lazy::new(|| {
    BRAND_RULES
        .iter()
        .map(|rule| {
            let regex = Regex::new(rule.pattern).expect("brand rule patterns are valid regexes");
            (*rule, regex)
        })
        .collect()
});

/// Rewrites vendor and model names into a brand token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentFilter {
    brand: String,
    identity: String,
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self {
            brand: DEFAULT_BRAND.to_string(),
            identity: format!("I am {DEFAULT_BRAND}"),
        }
    }
}

impl ContentFilter {
    /// Creates a filter with a custom brand token.
    ///
    /// The brand must not itself be rewritten by any rule, otherwise the
    /// filter would stop being idempotent.
    pub fn with_brand(brand: impl Into<String>) -> Result<Self, StreamError> {
        let brand = brand.into();
        if brand.trim().is_empty() {
            return Err(StreamError::Config("brand must not be empty".into()));
        }
        if let Some((rule, _)) = COMPILED_RULES.iter().find(|(_, re)| re.is_match(&brand)) {
            return Err(StreamError::Config(format!(
                "brand {brand:?} is matched by filter rule {:?}",
                rule.name
            )));
        }
        let identity = format!("I am {brand}");
        Ok(Self { brand, identity })
    }

    pub fn brand(&self) -> &str {
        &self.brand
    }

    /// Applies every rule in table order.
    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (rule, regex) in COMPILED_RULES.iter() {
            let replacement = match rule.replacement {
                Replacement::Brand => self.brand.as_str(),
                Replacement::Identity => self.identity.as_str(),
            };
            let rewritten = match regex.replace_all(&out, NoExpand(replacement)) {
                Cow::Borrowed(_) => None,
                Cow::Owned(rewritten) => Some(rewritten),
            };
            if let Some(rewritten) = rewritten {
                out = rewritten;
            }
        }
        out
    }
}

/// Applies the default filter.
pub fn filter_content(text: &str) -> String {
    ContentFilter::default().apply(text)
}
