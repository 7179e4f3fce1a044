//! Batch accumulation under document-count and token-sum thresholds.

use crate::document::Document;

/// Why a batch was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Adding the next document would overshoot a threshold.
    ThresholdReached,
    /// A single document alone exceeds the token safety ceiling.
    SingleOverSafety,
    /// End of the source stream.
    Eof,
}

impl FlushReason {
    /// Stable label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ThresholdReached => "threshold-reached",
            Self::SingleOverSafety => "single-over-safety",
            Self::Eof => "eof",
        }
    }
}

impl std::fmt::Display for FlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A batch ready for `upsert`.
#[derive(Debug)]
pub struct Flush {
    /// The batched documents, in source order.
    pub documents: Vec<Document>,
    /// Why the batch was emitted.
    pub reason: FlushReason,
    /// Sum of the documents' token counts.
    pub token_total: usize,
}

/// Accumulates documents and decides when to flush.
///
/// The aggregator never talks to the store itself; it only emits
/// [`Flush`] values for the indexer to apply.
#[derive(Debug)]
pub struct BatchAggregator {
    max_docs: usize,
    max_tokens: usize,
    pending: Vec<Document>,
    token_sum: usize,
}

impl BatchAggregator {
    /// Creates an aggregator with the given thresholds.
    #[must_use]
    pub fn new(max_docs: usize, max_tokens: usize) -> Self {
        Self {
            max_docs: max_docs.max(1),
            max_tokens,
            pending: Vec::new(),
            token_sum: 0,
        }
    }

    /// Number of buffered documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Buffered token sum.
    #[must_use]
    pub const fn token_sum(&self) -> usize {
        self.token_sum
    }

    /// Accepts one document, returning zero, one, or two flushes.
    ///
    /// A document that alone exceeds the token ceiling first flushes the
    /// existing buffer, then goes out by itself with
    /// [`FlushReason::SingleOverSafety`]. Otherwise the buffer is flushed
    /// with [`FlushReason::ThresholdReached`] before the document would
    /// overshoot either threshold.
    pub fn push(&mut self, document: Document) -> Vec<Flush> {
        let mut flushes = Vec::new();
        let tokens = document.token_count;

        if tokens > self.max_tokens {
            if !self.pending.is_empty() {
                flushes.push(self.drain(FlushReason::ThresholdReached));
            }
            flushes.push(Flush {
                token_total: tokens,
                documents: vec![document],
                reason: FlushReason::SingleOverSafety,
            });
            return flushes;
        }

        let over_docs = self.pending.len() + 1 > self.max_docs;
        let over_tokens = self.token_sum + tokens > self.max_tokens;
        if !self.pending.is_empty() && (over_docs || over_tokens) {
            flushes.push(self.drain(FlushReason::ThresholdReached));
        }

        self.token_sum += tokens;
        self.pending.push(document);
        flushes
    }

    /// Emits the final batch at end-of-stream, if anything is buffered.
    pub fn finish(&mut self) -> Option<Flush> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.drain(FlushReason::Eof))
        }
    }

    fn drain(&mut self, reason: FlushReason) -> Flush {
        let token_total = self.token_sum;
        self.token_sum = 0;
        Flush {
            documents: std::mem::take(&mut self.pending),
            reason,
            token_total,
        }
    }
}
