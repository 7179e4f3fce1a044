//! Token-budget truncation.
//!
//! [`Truncator::fit`] guarantees `count(out) <= max_tokens` for every input
//! and every strategy. Content budgets account for the sentinel marker; a
//! final compose-and-verify pass backs the guarantee even where token
//! counts are not perfectly additive across concatenation.

use std::str::FromStr;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::tokenizer::Tokenizer;

/// Marker injected where text was removed.
pub const TRUNCATION_SENTINEL: &str = "\n\n[... truncated ...]\n\n";

/// Below this budget the `sentences` strategy degrades to `middle_out`;
/// whole sentences are too coarse a unit to pack a tiny budget.
const MIN_SENTENCE_BUDGET: usize = 20;

/// How text is cut down to a token ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationStrategy {
    /// Keep the prefix, append the sentinel.
    End,
    /// Keep the suffix, prepend the sentinel.
    Start,
    /// Keep both ends, inject the sentinel in the middle.
    MiddleOut,
    /// Keep whole sentences from both ends around the sentinel.
    Sentences,
    /// Select by the model's text shape hint.
    Auto,
}

impl TruncationStrategy {
    /// Stable lower-case label used in metadata and config.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::End => "end",
            Self::Start => "start",
            Self::MiddleOut => "middle_out",
            Self::Sentences => "sentences",
            Self::Auto => "auto",
        }
    }
}

impl std::fmt::Display for TruncationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TruncationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "end" => Ok(Self::End),
            "start" => Ok(Self::Start),
            "middle_out" | "middle-out" => Ok(Self::MiddleOut),
            "sentences" => Ok(Self::Sentences),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown truncation strategy: {other}")),
        }
    }
}

/// Shape hint for a model's embeddable text, consumed by
/// [`TruncationStrategy::Auto`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextShape {
    /// Short identifier-like values; keep the front.
    NameLike,
    /// Running prose; cut on sentence boundaries.
    ProseLike,
    /// Anything else.
    #[default]
    Mixed,
}

impl TextShape {
    /// Infers a shape from the semantic field names of a model.
    #[must_use]
    pub fn infer(semantic_fields: &[String]) -> Self {
        const NAMEY: &[&str] = &["name", "title", "label", "code", "key", "id"];
        const PROSEY: &[&str] = &[
            "description",
            "comment",
            "text",
            "body",
            "notes",
            "summary",
            "doc",
        ];

        let lower: Vec<String> = semantic_fields.iter().map(|f| f.to_lowercase()).collect();
        if !lower.is_empty() && lower.iter().all(|f| NAMEY.iter().any(|n| f.contains(n))) {
            return Self::NameLike;
        }
        if lower.iter().any(|f| PROSEY.iter().any(|p| f.contains(p))) {
            return Self::ProseLike;
        }
        Self::Mixed
    }
}

/// Result of a [`Truncator::fit`] call.
#[derive(Debug, Clone)]
pub struct Truncation {
    /// The (possibly shortened) text.
    pub text: String,
    /// Real token count of `text`, recomputed after composition.
    pub tokens: usize,
    /// Whether anything was removed.
    pub truncated: bool,
    /// The concrete strategy that produced the output, after fallbacks.
    pub strategy: TruncationStrategy,
}

/// Fits text to a token ceiling under a chosen strategy.
pub struct Truncator {
    tokenizer: Arc<dyn Tokenizer>,
    sentence_boundary: Regex,
}

impl std::fmt::Debug for Truncator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Truncator").finish_non_exhaustive()
    }
}

impl Truncator {
    /// Creates a truncator over the given tokenizer.
    #[must_use]
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        #[allow(clippy::unwrap_used)] // pattern is a compile-time constant
        let sentence_boundary = Regex::new(r"[.!?]+\s+").unwrap();
        Self {
            tokenizer,
            sentence_boundary,
        }
    }

    fn count(&self, text: &str) -> usize {
        self.tokenizer.count(text)
    }

    /// Fits `text` into `max_tokens`.
    ///
    /// `shape` is only consulted when `strategy` is
    /// [`TruncationStrategy::Auto`]. The post-condition
    /// `count(result.text) <= max_tokens` holds for every input; when the
    /// sentinel itself would not fit, the output is a plain content cut
    /// with no sentinel.
    #[must_use]
    pub fn fit(
        &self,
        text: &str,
        max_tokens: usize,
        strategy: TruncationStrategy,
        shape: TextShape,
    ) -> Truncation {
        let original = self.count(text);
        if original <= max_tokens {
            return Truncation {
                text: text.to_string(),
                tokens: original,
                truncated: false,
                strategy,
            };
        }

        let resolved = self.resolve(strategy, shape, text, max_tokens);
        let out = match resolved {
            TruncationStrategy::End => self.cut_end(text, max_tokens),
            TruncationStrategy::Start => self.cut_start(text, max_tokens),
            TruncationStrategy::MiddleOut => self.cut_middle(text, max_tokens),
            TruncationStrategy::Sentences => self.cut_sentences(text, max_tokens),
            // resolve() never returns Auto
            TruncationStrategy::Auto => self.cut_end(text, max_tokens),
        };
        let tokens = self.count(&out);
        debug_assert!(tokens <= max_tokens, "truncation exceeded budget");
        Truncation {
            text: out,
            tokens,
            truncated: true,
            strategy: resolved,
        }
    }

    /// Resolves `auto` and applies the fallback chain:
    /// `sentences → middle_out` on short inputs or tiny budgets,
    /// `middle_out → end` when the sentinel will not fit.
    fn resolve(
        &self,
        strategy: TruncationStrategy,
        shape: TextShape,
        text: &str,
        max_tokens: usize,
    ) -> TruncationStrategy {
        let mut s = match strategy {
            TruncationStrategy::Auto => match shape {
                TextShape::NameLike => TruncationStrategy::End,
                TextShape::ProseLike => TruncationStrategy::Sentences,
                TextShape::Mixed => TruncationStrategy::MiddleOut,
            },
            other => other,
        };

        if s == TruncationStrategy::Sentences {
            let sentences = self.sentence_spans(text).len();
            if sentences < 3 || max_tokens < MIN_SENTENCE_BUDGET {
                s = TruncationStrategy::MiddleOut;
            }
        }
        if s == TruncationStrategy::MiddleOut && !self.sentinel_fits(max_tokens) {
            s = TruncationStrategy::End;
        }
        s
    }

    fn sentinel_fits(&self, max_tokens: usize) -> bool {
        self.count(TRUNCATION_SENTINEL) < max_tokens
    }

    /// Largest prefix of `text` (on a char boundary) counting at most
    /// `budget` tokens. Binary search with a linear walk-back guard.
    fn prefix_fitting<'t>(&self, text: &'t str, budget: usize) -> &'t str {
        if budget == 0 || text.is_empty() {
            return "";
        }
        let cuts = char_cuts(text);
        let (mut lo, mut hi) = (0, cuts.len() - 1);
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if self.count(&text[..cuts[mid]]) <= budget {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        while lo > 0 && self.count(&text[..cuts[lo]]) > budget {
            lo -= 1;
        }
        &text[..cuts[lo]]
    }

    /// Largest suffix of `text` counting at most `budget` tokens.
    fn suffix_fitting<'t>(&self, text: &'t str, budget: usize) -> &'t str {
        if budget == 0 || text.is_empty() {
            return "";
        }
        let cuts = char_cuts(text);
        let (mut lo, mut hi) = (0, cuts.len() - 1);
        // Searching for the smallest start index whose suffix fits.
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.count(&text[cuts[mid]..]) <= budget {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        let last = cuts.len() - 1;
        while lo < last && self.count(&text[cuts[lo]..]) > budget {
            lo += 1;
        }
        &text[cuts[lo]..]
    }

    fn cut_end(&self, text: &str, max_tokens: usize) -> String {
        let with_sentinel = self.sentinel_fits(max_tokens);
        let mut budget = if with_sentinel {
            max_tokens - self.count(TRUNCATION_SENTINEL)
        } else {
            max_tokens
        };
        loop {
            let prefix = self.prefix_fitting(text, budget);
            let candidate = if with_sentinel {
                format!("{prefix}{TRUNCATION_SENTINEL}")
            } else {
                prefix.to_string()
            };
            if self.count(&candidate) <= max_tokens {
                return candidate;
            }
            if budget == 0 {
                // Sentinel alone is under max_tokens whenever with_sentinel
                // holds, so this only trims a pathological composition.
                return if with_sentinel {
                    TRUNCATION_SENTINEL.to_string()
                } else {
                    String::new()
                };
            }
            budget -= 1;
        }
    }

    fn cut_start(&self, text: &str, max_tokens: usize) -> String {
        let with_sentinel = self.sentinel_fits(max_tokens);
        let mut budget = if with_sentinel {
            max_tokens - self.count(TRUNCATION_SENTINEL)
        } else {
            max_tokens
        };
        loop {
            let suffix = self.suffix_fitting(text, budget);
            let candidate = if with_sentinel {
                format!("{TRUNCATION_SENTINEL}{suffix}")
            } else {
                suffix.to_string()
            };
            if self.count(&candidate) <= max_tokens {
                return candidate;
            }
            if budget == 0 {
                return if with_sentinel {
                    TRUNCATION_SENTINEL.to_string()
                } else {
                    String::new()
                };
            }
            budget -= 1;
        }
    }

    fn cut_middle(&self, text: &str, max_tokens: usize) -> String {
        // resolve() already rerouted to `end` when the sentinel can't fit.
        let sentinel_tokens = self.count(TRUNCATION_SENTINEL);
        let mut content = max_tokens.saturating_sub(sentinel_tokens);
        loop {
            let head_budget = content / 2;
            let tail_budget = content - head_budget;
            let head = self.prefix_fitting(text, head_budget);
            let tail = self.suffix_fitting(text, tail_budget);
            if head.len() + tail.len() <= text.len() {
                let candidate = format!("{head}{TRUNCATION_SENTINEL}{tail}");
                if self.count(&candidate) <= max_tokens {
                    return candidate;
                }
            }
            if content == 0 {
                return TRUNCATION_SENTINEL.to_string();
            }
            content -= 1;
        }
    }

    fn cut_sentences(&self, text: &str, max_tokens: usize) -> String {
        let spans = self.sentence_spans(text);
        let sentinel_tokens = self.count(TRUNCATION_SENTINEL);
        let budget = max_tokens.saturating_sub(sentinel_tokens);

        let counts: Vec<usize> = spans
            .iter()
            .map(|&(start, end)| self.count(&text[start..end]))
            .collect();

        // Alternate front/back, keeping whole sentences while they fit.
        let mut front = 0usize;
        let mut back = 0usize;
        let mut used = 0usize;
        loop {
            let mut advanced = false;
            if front + back < spans.len() && used + counts[front] <= budget {
                used += counts[front];
                front += 1;
                advanced = true;
            }
            if front + back < spans.len() {
                let idx = spans.len() - 1 - back;
                if used + counts[idx] <= budget {
                    used += counts[idx];
                    back += 1;
                    advanced = true;
                }
            }
            if !advanced {
                break;
            }
        }

        // The greedy pass keeps front + back <= spans.len(), so the head
        // prefix and tail suffix never overlap.
        loop {
            if front == 0 && back == 0 {
                // No whole sentence fits the budget.
                return self.cut_middle(text, max_tokens);
            }
            let head = if front > 0 { &text[..spans[front - 1].1] } else { "" };
            let tail = if back > 0 {
                &text[spans[spans.len() - back].0..]
            } else {
                ""
            };
            let candidate = format!("{head}{TRUNCATION_SENTINEL}{tail}");
            if self.count(&candidate) <= max_tokens {
                return candidate;
            }
            if back > 0 {
                back -= 1;
            } else {
                front -= 1;
            }
        }
    }

    /// Byte spans of sentences covering the whole input. The boundary is
    /// `[.!?]+` followed by whitespace; trailing whitespace stays attached
    /// to the sentence it closes.
    fn sentence_spans(&self, text: &str) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        let mut start = 0usize;
        for m in self.sentence_boundary.find_iter(text) {
            spans.push((start, m.end()));
            start = m.end();
        }
        if start < text.len() {
            spans.push((start, text.len()));
        }
        spans
    }
}

/// Byte offsets of every char boundary, `cuts[k]` = offset after `k` chars.
fn char_cuts(text: &str) -> Vec<usize> {
    let mut cuts: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    cuts.push(text.len());
    cuts
}
