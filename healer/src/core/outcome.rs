//! Deterministic classification of attempt results.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::types::{AttemptResult, Exit, SUCCESS_EQUIVALENT_EXIT_CODE};

pub const DEFAULT_EOF_MARKER: &str = "EOF";
pub const DEFAULT_TEST_BANNER: &str = r"(?i)test session starts";
pub const DEFAULT_TEST_FAILURE_PATTERN: &str =
    r"\bFAILED\b|\bERROR\b|\b\d+ (?:failed|errors?)\b";

static DEFAULT_BANNER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DEFAULT_TEST_BANNER).unwrap());
static DEFAULT_FAILURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DEFAULT_TEST_FAILURE_PATTERN).unwrap());

/// Classification of a single attempt. Always recomputed from an [`AttemptResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    RuntimeFailure,
    TestFailure,
    /// Never repaired.
    Timeout,
}

/// Whether a zero exit is trusted as-is or checked for failing sub-tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifyMode {
    #[default]
    Basic,
    InspectTests,
}

/// Maps an [`AttemptResult`] to an [`Outcome`].
///
/// - `TimedOut` is `Timeout`.
/// - Exit `0` and the reserved exit `2` are `Success`.
/// - Anything else, including signal termination, is `RuntimeFailure`.
///
/// In [`ClassifyMode::InspectTests`], a zero exit whose output contains a test-session
/// banner followed by a failure marker is downgraded to `TestFailure`.
#[derive(Debug, Clone)]
pub struct Classifier {
    mode: ClassifyMode,
    banner: Regex,
    failure: Regex,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::with_default_markers(ClassifyMode::Basic)
    }
}

impl Classifier {
    pub fn with_default_markers(mode: ClassifyMode) -> Self {
        Self {
            mode,
            banner: DEFAULT_BANNER_RE.clone(),
            failure: DEFAULT_FAILURE_RE.clone(),
        }
    }

    /// Build a classifier with custom banner and failure patterns.
    pub fn new(mode: ClassifyMode, banner: &str, failure: &str) -> Result<Self> {
        Ok(Self {
            mode,
            banner: Regex::new(banner).with_context(|| format!("compile test banner {banner}"))?,
            failure: Regex::new(failure)
                .with_context(|| format!("compile test failure pattern {failure}"))?,
        })
    }

    pub fn mode(&self) -> ClassifyMode {
        self.mode
    }

    /// Classify an attempt, optionally consulting a secondary log (e.g. a test report file).
    pub fn classify(&self, result: &AttemptResult, secondary_log: Option<&str>) -> Outcome {
        match result.exit {
            Exit::TimedOut => Outcome::Timeout,
            Exit::Code(0) => {
                if self.mode == ClassifyMode::InspectTests
                    && (self.reports_test_failure(&result.stdout)
                        || secondary_log.is_some_and(|log| self.reports_test_failure(log)))
                {
                    Outcome::TestFailure
                } else {
                    Outcome::Success
                }
            }
            Exit::Code(SUCCESS_EQUIVALENT_EXIT_CODE) => Outcome::Success,
            Exit::Code(_) | Exit::Signaled => Outcome::RuntimeFailure,
        }
    }

    /// True when `text` contains the banner and a failure marker somewhere after it.
    pub fn reports_test_failure(&self, text: &str) -> bool {
        match self.banner.find(text) {
            Some(banner) => self.failure.is_match(&text[banner.end()..]),
            None => false,
        }
    }
}

/// True when the child's stderr shows it hit end-of-input while waiting for stdin.
pub fn stderr_reports_eof(stderr: &str, marker: &str) -> bool {
    !marker.is_empty() && stderr.contains(marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit: Exit, stdout: &str) -> AttemptResult {
        AttemptResult::new(exit, stdout, "")
    }

    #[test]
    fn zero_and_reserved_exit_are_success() {
        let classifier = Classifier::default();
        assert_eq!(
            classifier.classify(&result(Exit::Code(0), ""), None),
            Outcome::Success
        );
        assert_eq!(
            classifier.classify(&result(Exit::Code(2), ""), None),
            Outcome::Success
        );
    }

    #[test]
    fn other_exits_are_runtime_failures() {
        let classifier = Classifier::default();
        assert_eq!(
            classifier.classify(&result(Exit::Code(1), ""), None),
            Outcome::RuntimeFailure
        );
        assert_eq!(
            classifier.classify(&result(Exit::Code(127), ""), None),
            Outcome::RuntimeFailure
        );
        assert_eq!(
            classifier.classify(&result(Exit::Signaled, ""), None),
            Outcome::RuntimeFailure
        );
    }

    #[test]
    fn timed_out_exit_is_timeout() {
        let classifier = Classifier::default();
        let outcome = classifier.classify(&result(Exit::TimedOut, "partial"), None);
        assert_eq!(outcome, Outcome::Timeout);
    }

    #[test]
    fn basic_mode_ignores_failing_tests() {
        let stdout = "===== test session starts =====\ntest_x.py F\nFAILED test_x.py::test_a\n";
        let classifier = Classifier::with_default_markers(ClassifyMode::Basic);
        assert_eq!(
            classifier.classify(&result(Exit::Code(0), stdout), None),
            Outcome::Success
        );
    }

    #[test]
    fn inspect_mode_downgrades_zero_exit_with_failed_tests() {
        let stdout = "===== test session starts =====\ntest_x.py F\nFAILED test_x.py::test_a\n";
        let classifier = Classifier::with_default_markers(ClassifyMode::InspectTests);
        let outcome = classifier.classify(&result(Exit::Code(0), stdout), None);
        assert_eq!(outcome, Outcome::TestFailure);
    }

    #[test]
    fn inspect_mode_requires_banner_before_marker() {
        let stdout = "FAILED to load optional plugin\n===== test session starts =====\n3 passed\n";
        let classifier = Classifier::with_default_markers(ClassifyMode::InspectTests);
        assert_eq!(
            classifier.classify(&result(Exit::Code(0), stdout), None),
            Outcome::Success
        );
    }

    #[test]
    fn inspect_mode_reads_summary_counts_and_secondary_log() {
        let classifier = Classifier::with_default_markers(ClassifyMode::InspectTests);
        assert!(classifier.reports_test_failure("== test session starts ==\n== 2 failed, 1 passed =="));

        let log = "=== test session starts ===\nERROR collecting test_y.py\n";
        assert_eq!(
            classifier.classify(&result(Exit::Code(0), "all good"), Some(log)),
            Outcome::TestFailure
        );
    }

    #[test]
    fn inspect_mode_leaves_nonzero_classification_alone() {
        let stdout = "===== test session starts =====\nFAILED\n";
        let classifier = Classifier::with_default_markers(ClassifyMode::InspectTests);
        assert_eq!(
            classifier.classify(&result(Exit::Code(1), stdout), None),
            Outcome::RuntimeFailure
        );
    }

    #[test]
    fn custom_patterns_are_validated() {
        assert!(Classifier::new(ClassifyMode::InspectTests, "(", "x").is_err());
        let classifier =
            Classifier::new(ClassifyMode::InspectTests, "^running tests", "not ok").expect("custom");
        assert!(classifier.reports_test_failure("running tests\nnot ok 1 - adds\n"));
    }

    #[test]
    fn eof_marker_detection() {
        let stderr = "Traceback...\nEOFError: EOF when reading a line\n";
        assert!(stderr_reports_eof(stderr, DEFAULT_EOF_MARKER));
        assert!(!stderr_reports_eof("ValueError", DEFAULT_EOF_MARKER));
        assert!(!stderr_reports_eof(stderr, ""));
    }
}
