use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed,
}

/// One check's result, appended in execution order.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub phase: &'static str,
    pub check: &'static str,
    pub outcome: Outcome,
    pub detail: Option<String>,
}

/// Aggregate outcome of one harness run: every check's result plus, if the
/// environment died before all phases ran, one fatal-error summary.
#[derive(Debug, Default)]
pub struct RunReport {
    results: Vec<CheckResult>,
    fatal: Option<String>,
}

/// Exit code for a run where the environment never came up, distinguishable
/// from check failures so operators can tell "the app is broken" apart from
/// "the test environment never came up".
pub const EXIT_STARTUP_FAILURE: i32 = 2;
pub const EXIT_CHECK_FAILURE: i32 = 1;
pub const EXIT_SUCCESS: i32 = 0;

impl RunReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        phase: &'static str,
        check: &'static str,
        outcome: Outcome,
        detail: Option<String>,
    ) {
        self.results.push(CheckResult {
            phase,
            check,
            outcome,
            detail,
        });
    }

    pub fn record_fatal(&mut self, summary: String) {
        self.fatal = Some(summary);
    }

    #[must_use]
    pub fn results(&self) -> &[CheckResult] {
        &self.results
    }

    #[must_use]
    pub fn fatal(&self) -> Option<&str> {
        self.fatal.as_deref()
    }

    #[must_use]
    pub fn passed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == Outcome::Passed)
            .count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.fatal.is_none() && self.failed() == 0
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.fatal.is_some() {
            EXIT_STARTUP_FAILURE
        } else if self.failed() > 0 {
            EXIT_CHECK_FAILURE
        } else {
            EXIT_SUCCESS
        }
    }

    /// Renders the per-check outcomes and the aggregate summary.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut current_phase = "";
        for result in &self.results {
            if result.phase != current_phase {
                current_phase = result.phase;
                let _ = writeln!(out, "== {current_phase} ==");
            }
            let marker = match result.outcome {
                Outcome::Passed => "PASS",
                Outcome::Failed => "FAIL",
            };
            match &result.detail {
                Some(detail) => {
                    let _ = writeln!(out, "  [{marker}] {}: {detail}", result.check);
                }
                None => {
                    let _ = writeln!(out, "  [{marker}] {}", result.check);
                }
            }
        }
        let _ = writeln!(
            out,
            "total: {} passed, {} failed",
            self.passed(),
            self.failed()
        );
        if let Some(fatal) = &self.fatal {
            let _ = writeln!(out, "fatal: {fatal}");
        }
        out
    }
}
