//! Category matching
//!
//! Picks exactly one category for every collected sequence by walking the
//! rule catalog in its declared order. The first category that claims a
//! sequence wins, even when a later category would also match.

use tracing::trace;

use crate::config::{RuleCatalog, RuleEntry};
use crate::sequence::FileSequence;

/// Extensions that let a shot-regex match alone claim a multi-frame sequence
const SEQUENCE_MEDIA_EXTENSIONS: &[&str] = &["exr", "mov"];

/// How a category claimed a sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchReason {
    /// Multi-frame sequence matched a keyword filter
    Keyword,
    /// Multi-frame sequence matched the shot regex with a media extension
    ShotRegex,
    /// Single file matched the category's extensions
    Extension,
    /// No category claimed it, but the last evaluated category lists the extension
    LastEvaluated,
    /// Nothing matched
    Fallback,
}

/// Outcome of classifying one sequence
#[derive(Debug, Clone)]
pub struct Classification<'a> {
    pub category: &'a RuleEntry,
    /// Text matched by the winning category's shot regex
    pub shot_match: Option<String>,
    pub reason: MatchReason,
}

/// Evaluates the rule catalog against sequences
#[derive(Debug, Clone, Copy)]
pub struct CategoryMatcher<'a> {
    catalog: &'a RuleCatalog,
}

impl<'a> CategoryMatcher<'a> {
    pub fn new(catalog: &'a RuleCatalog) -> Self {
        Self { catalog }
    }

    /// Classify a sequence into exactly one category
    pub fn classify(&self, seq: &FileSequence) -> Classification<'a> {
        let file_name = seq.display_name();
        let extension = seq.extension_lower();
        let mut last_evaluated: Option<(&'a RuleEntry, Option<String>)> = None;

        for rule in self.catalog.classification_rules() {
            let shot_match = rule.shot_match(&file_name);

            let reason = if seq.is_sequence() {
                if rule.matches_keyword(&file_name) {
                    Some(MatchReason::Keyword)
                } else if shot_match.is_some()
                    && SEQUENCE_MEDIA_EXTENSIONS.contains(&extension.as_str())
                {
                    Some(MatchReason::ShotRegex)
                } else {
                    None
                }
            } else if rule.accepts_extension(&extension) {
                Some(MatchReason::Extension)
            } else {
                None
            };

            if let Some(reason) = reason {
                trace!(file = %file_name, category = %rule.name, ?reason, "Category matched");
                return Classification {
                    category: rule,
                    shot_match,
                    reason,
                };
            }

            last_evaluated = Some((rule, shot_match));
        }

        if let Some((rule, shot_match)) = last_evaluated
            && rule.accepts_extension(&extension)
        {
            trace!(file = %file_name, category = %rule.name, "Claimed by last evaluated category");
            return Classification {
                category: rule,
                shot_match,
                reason: MatchReason::LastEvaluated,
            };
        }

        trace!(file = %file_name, "No category matched");
        Classification {
            category: self.catalog.unmatched(),
            shot_match: None,
            reason: MatchReason::Fallback,
        }
    }
}
