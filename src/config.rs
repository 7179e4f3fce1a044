//! Pipeline configuration with builder pattern and environment variable
//! support.
//!
//! Configuration is resolved in order: explicit values → environment
//! variables → defaults.

use std::time::Duration;

use crate::text::TruncationStrategy;

/// Default maximum documents per upsert.
const DEFAULT_BATCH_DOCS: usize = 128;
/// Per-request token ceiling of the embedding endpoint.
const REQUEST_TOKEN_CEILING: usize = 300_000;
/// Default token-sum safety threshold, 5% below the request ceiling.
const DEFAULT_BATCH_TOKENS: usize = REQUEST_TOKEN_CEILING * 95 / 100;
/// Default hard per-document token limit.
const DEFAULT_API_TOKEN_LIMIT: usize = 8192;
/// Default store-call deadline in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Configuration for the indexing pipeline.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Upper bound on documents per upsert.
    pub batch_size_docs: usize,
    /// Token-sum safety threshold per batch.
    pub batch_size_tokens: usize,
    /// Hard per-document token ceiling.
    pub api_token_limit: usize,
    /// Default truncation strategy (models may override).
    pub truncation_strategy: TruncationStrategy,
    /// Orchestrator width: partitions indexed concurrently.
    pub parallel_partitions: usize,
    /// Skip completed models whose source signature matches.
    pub resume: bool,
    /// Drop stale partitions' data before indexing replacements.
    pub delete_stale: bool,
    /// Deterministic sampling: index every Nth row. Forces width 1.
    pub sample_every: Option<u64>,
    /// Deadline for each store call.
    pub request_timeout: Duration,
}

impl IndexConfig {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> IndexConfigBuilder {
        IndexConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::builder().from_env().build()
    }

    /// The orchestrator width actually used: sampling modes are pinned
    /// to one worker so row selection stays deterministic.
    #[must_use]
    pub fn effective_width(&self) -> usize {
        if self.sample_every.is_some() {
            1
        } else {
            self.parallel_partitions.max(1)
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`IndexConfig`].
#[derive(Debug, Clone, Default)]
pub struct IndexConfigBuilder {
    batch_size_docs: Option<usize>,
    batch_size_tokens: Option<usize>,
    api_token_limit: Option<usize>,
    truncation_strategy: Option<TruncationStrategy>,
    parallel_partitions: Option<usize>,
    resume: Option<bool>,
    delete_stale: Option<bool>,
    sample_every: Option<u64>,
    request_timeout: Option<Duration>,
}

impl IndexConfigBuilder {
    /// Populates unset fields from `PARTIX_*` environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        fn parse<T: std::str::FromStr>(var: &str) -> Option<T> {
            std::env::var(var).ok().and_then(|v| v.parse().ok())
        }

        if self.batch_size_docs.is_none() {
            self.batch_size_docs = parse("PARTIX_BATCH_DOCS");
        }
        if self.batch_size_tokens.is_none() {
            self.batch_size_tokens = parse("PARTIX_BATCH_TOKENS");
        }
        if self.api_token_limit.is_none() {
            self.api_token_limit = parse("PARTIX_TOKEN_LIMIT");
        }
        if self.truncation_strategy.is_none() {
            self.truncation_strategy = parse("PARTIX_TRUNCATION");
        }
        if self.parallel_partitions.is_none() {
            self.parallel_partitions = parse("PARTIX_PARALLEL");
        }
        if self.resume.is_none() {
            self.resume = parse("PARTIX_RESUME");
        }
        if self.delete_stale.is_none() {
            self.delete_stale = parse("PARTIX_DELETE_STALE");
        }
        if self.sample_every.is_none() {
            self.sample_every = parse("PARTIX_SAMPLE_EVERY");
        }
        if self.request_timeout.is_none() {
            self.request_timeout = parse::<u64>("PARTIX_TIMEOUT_SECS").map(Duration::from_secs);
        }
        self
    }

    /// Sets the per-upsert document cap.
    #[must_use]
    pub const fn batch_size_docs(mut self, n: usize) -> Self {
        self.batch_size_docs = Some(n);
        self
    }

    /// Sets the per-batch token safety threshold.
    #[must_use]
    pub const fn batch_size_tokens(mut self, n: usize) -> Self {
        self.batch_size_tokens = Some(n);
        self
    }

    /// Sets the hard per-document token ceiling.
    #[must_use]
    pub const fn api_token_limit(mut self, n: usize) -> Self {
        self.api_token_limit = Some(n);
        self
    }

    /// Sets the default truncation strategy.
    #[must_use]
    pub const fn truncation_strategy(mut self, strategy: TruncationStrategy) -> Self {
        self.truncation_strategy = Some(strategy);
        self
    }

    /// Sets the orchestrator width.
    #[must_use]
    pub const fn parallel_partitions(mut self, n: usize) -> Self {
        self.parallel_partitions = Some(n);
        self
    }

    /// Enables or disables resume.
    #[must_use]
    pub const fn resume(mut self, on: bool) -> Self {
        self.resume = Some(on);
        self
    }

    /// Enables or disables stale cleanup before indexing.
    #[must_use]
    pub const fn delete_stale(mut self, on: bool) -> Self {
        self.delete_stale = Some(on);
        self
    }

    /// Enables deterministic sampling of every `n`th row.
    #[must_use]
    pub const fn sample_every(mut self, n: u64) -> Self {
        self.sample_every = Some(n);
        self
    }

    /// Sets the store-call deadline.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Builds the [`IndexConfig`].
    #[must_use]
    pub fn build(self) -> IndexConfig {
        IndexConfig {
            batch_size_docs: self.batch_size_docs.unwrap_or(DEFAULT_BATCH_DOCS),
            batch_size_tokens: self.batch_size_tokens.unwrap_or(DEFAULT_BATCH_TOKENS),
            api_token_limit: self.api_token_limit.unwrap_or(DEFAULT_API_TOKEN_LIMIT),
            truncation_strategy: self.truncation_strategy.unwrap_or(TruncationStrategy::Auto),
            parallel_partitions: self.parallel_partitions.unwrap_or(1),
            resume: self.resume.unwrap_or(false),
            delete_stale: self.delete_stale.unwrap_or(false),
            sample_every: self.sample_every,
            request_timeout: self
                .request_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        }
    }
}
