//! Rule-driven traffic filter.
//!
//! ## Evaluation Order
//!
//! 1. Block rules are checked against the URL first - a match answers the
//!    request with a 403 and stops the chain
//! 2. Streaming paths are checked against the path - a match marks the flow
//!    for incremental delivery and evaluation continues
//! 3. Allow rules, then log-only rules, are checked for observability
//! 4. Default pass-through if nothing matched
//!
//! A block match always wins over every other outcome.

use crate::config::{RulesConfig, StreamingConfig};
use crate::error::RuleError;
use crate::flow::{Flow, FlowResponse};
use crate::interceptor::{Decision, Interceptor, InterceptorToggle};
use crate::rules::{MatchKind, RuleMatcher};
use crate::stats::BlockCounter;

/// Status code of the synthesized block response.
pub const BLOCK_STATUS: u16 = 403;

/// Body of the synthesized block response.
pub const BLOCK_BODY: &str = "Request blocked by WarpGateway";

/// Content type of the synthesized block response.
pub const BLOCK_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Which policy category a request fell into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    /// Matched a block rule.
    Blocked,
    /// Matched an allow rule.
    Allowed,
    /// Matched a log-only rule.
    LogOnly,
    /// Matched nothing.
    Pass,
}

impl FilterVerdict {
    /// Returns the verdict label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterVerdict::Blocked => "BLOCKED",
            FilterVerdict::Allowed => "ALLOWED",
            FilterVerdict::LogOnly => "LOG_ONLY",
            FilterVerdict::Pass => "PASS",
        }
    }
}

/// Result of evaluating one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterOutcome {
    /// The policy category.
    pub verdict: FilterVerdict,
    /// Whether the flow was marked for streaming.
    pub streaming: bool,
}

impl FilterOutcome {
    /// Returns true if the request was blocked.
    pub fn is_blocked(&self) -> bool {
        self.verdict == FilterVerdict::Blocked
    }
}

/// Interceptor applying block, allow, and log-only rules plus streaming paths.
#[derive(Debug)]
pub struct TrafficFilter {
    toggle: InterceptorToggle,
    block: RuleMatcher,
    allow: RuleMatcher,
    log_only: RuleMatcher,
    streaming_paths: Vec<String>,
    blocked: BlockCounter,
}

impl TrafficFilter {
    /// Interceptor name.
    pub const NAME: &'static str = "TrafficFilter";

    /// Creates a filter with no rules.
    pub fn new(blocked: BlockCounter) -> Self {
        Self {
            toggle: InterceptorToggle::new(),
            block: RuleMatcher::new(),
            allow: RuleMatcher::new(),
            log_only: RuleMatcher::new(),
            streaming_paths: Vec::new(),
            blocked,
        }
    }

    /// Builds a filter from configuration, using the configured default match kind.
    pub fn from_config(
        rules: &RulesConfig,
        streaming: &StreamingConfig,
        blocked: BlockCounter,
    ) -> Result<Self, RuleError> {
        let kind = rules.match_kind;
        let filter = Self {
            toggle: InterceptorToggle::new(),
            block: RuleMatcher::from_patterns(rules.block.iter().cloned(), kind)?,
            allow: RuleMatcher::from_patterns(rules.allow.iter().cloned(), kind)?,
            log_only: RuleMatcher::from_patterns(rules.log_only.iter().cloned(), kind)?,
            streaming_paths: streaming.paths.clone(),
            blocked,
        };

        tracing::info!("Loaded {} block rules", filter.block.len());
        tracing::info!("Loaded {} allow rules", filter.allow.len());
        tracing::info!("Loaded {} log_only rules", filter.log_only.len());

        Ok(filter)
    }

    /// Sets the streaming path substrings.
    pub fn with_streaming_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.streaming_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Appends a block rule at runtime.
    pub fn add_block_rule(&self, pattern: &str, kind: MatchKind) -> Result<(), RuleError> {
        self.block.add_rule(pattern, kind)?;
        tracing::info!("Added block rule: {}", pattern);
        Ok(())
    }

    /// Appends an allow rule at runtime.
    pub fn add_allow_rule(&self, pattern: &str, kind: MatchKind) -> Result<(), RuleError> {
        self.allow.add_rule(pattern, kind)?;
        tracing::info!("Added allow rule: {}", pattern);
        Ok(())
    }

    /// Appends a log-only rule at runtime.
    pub fn add_log_only_rule(&self, pattern: &str, kind: MatchKind) -> Result<(), RuleError> {
        self.log_only.add_rule(pattern, kind)?;
        tracing::info!("Added log_only rule: {}", pattern);
        Ok(())
    }

    pub fn block_matcher(&self) -> &RuleMatcher {
        &self.block
    }

    pub fn allow_matcher(&self) -> &RuleMatcher {
        &self.allow
    }

    pub fn log_only_matcher(&self) -> &RuleMatcher {
        &self.log_only
    }

    pub fn streaming_paths(&self) -> &[String] {
        &self.streaming_paths
    }

    /// Returns the shared blocked-request counter.
    pub fn block_counter(&self) -> BlockCounter {
        self.blocked.clone()
    }

    /// Creates the terminal response written for blocked requests.
    pub fn block_response() -> FlowResponse {
        FlowResponse::new(BLOCK_STATUS)
            .with_header("Content-Type", BLOCK_CONTENT_TYPE)
            .with_body(BLOCK_BODY)
    }

    /// Evaluates a request, writing any synthesized response onto the flow.
    pub fn evaluate(&self, flow: &mut Flow) -> FilterOutcome {
        let url = flow.request.url.as_str();
        let method = flow.request.method.as_str();

        if let Some(rule) = self.block.first_match(url) {
            tracing::warn!("BLOCKED: {} {} (rule {})", method, url, rule);
            flow.response = Some(Self::block_response());
            self.blocked.increment();
            return FilterOutcome {
                verdict: FilterVerdict::Blocked,
                streaming: false,
            };
        }

        let streaming = self
            .streaming_paths
            .iter()
            .any(|p| flow.request.path.contains(p.as_str()));
        if streaming {
            tracing::info!("STREAM ENABLED: {} {}", method, url);
        }

        let verdict = if self.allow.any_match(url) {
            tracing::info!("ALLOWED: {} {}", method, url);
            FilterVerdict::Allowed
        } else if self.log_only.any_match(url) {
            tracing::info!("LOG_ONLY: {} {}", method, url);
            FilterVerdict::LogOnly
        } else {
            tracing::debug!("PASS: {} {}", method, url);
            FilterVerdict::Pass
        };

        if streaming {
            flow.response = Some(FlowResponse::new(200).streaming());
        }

        FilterOutcome { verdict, streaming }
    }
}

impl Default for TrafficFilter {
    fn default() -> Self {
        Self::new(BlockCounter::new())
    }
}

impl Interceptor for TrafficFilter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_enabled(&self) -> bool {
        self.toggle.is_enabled()
    }

    fn set_enabled(&self, enabled: bool) {
        self.toggle.set(Self::NAME, enabled);
    }

    fn on_request(&self, flow: &mut Flow) -> Decision {
        if self.evaluate(flow).is_blocked() {
            Decision::Handled
        } else {
            Decision::Continue
        }
    }

    fn on_response(&self, flow: &mut Flow) -> Decision {
        if let Some(status) = flow.status() {
            tracing::debug!("RESPONSE: {} [{}]", flow.request.url, status);
        }
        Decision::Continue
    }
}
