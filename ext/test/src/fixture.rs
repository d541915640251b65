//! Conformance test fixture runner
//!
//! Loads YAML fixtures and runs them against the saboteur injector. Each
//! fixture registers its rules once; cases then run in order against the same
//! injector, so counters carry over from case to case.
//!
//! ```yaml
//! name: first-match-is-final
//! description: a limited first match never falls through
//! rules:
//!   - id: a
//!     target: dubbo
//!     action: delay
//!     matcher: { method: foo, effect-count: 0 }
//!   - id: b
//!     target: dubbo
//!     action: delay
//! cases:
//!   - name: limited
//!     target: dubbo
//!     attributes: { method: foo }
//!     expect: limited
//!     expect_rule: a
//!     counts: { a: 0, b: 0 }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use saboteur::prelude::*;
use saboteur::RuleConfig;
use serde::Deserialize;

use crate::{custom_matcher, TestActions};

/// A complete test fixture
#[derive(Debug, Deserialize)]
pub struct Fixture {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub rules: Vec<RuleConfig>,
    pub cases: Vec<TestCase>,
}

/// Test case: one intercepted call and what should come of it
#[derive(Debug, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub target: String,

    /// Omit for a call that carries no attributes at all.
    #[serde(default)]
    pub attributes: Option<BTreeMap<String, serde_json::Value>>,

    #[serde(default)]
    pub arguments: Vec<serde_json::Value>,

    /// Condition key → test matcher name (`subset`, `always`, `never`).
    #[serde(default)]
    pub matchers: BTreeMap<String, String>,

    /// Run the call this many times; expectations apply to the last run.
    #[serde(default = "one")]
    pub repeat: usize,

    /// Expected [`Decision::kind`].
    pub expect: String,

    /// Expected id of the rule the decision concerns.
    #[serde(default)]
    pub expect_rule: Option<String>,

    /// Expected merged flags visible after the call (subset check).
    #[serde(default)]
    pub expect_flags: BTreeMap<String, String>,

    /// Expected fire count per rule id after the call.
    #[serde(default)]
    pub counts: BTreeMap<String, u64>,
}

fn one() -> usize {
    1
}

impl TestCase {
    /// Build an [`InvocationContext`] for this case.
    ///
    /// # Panics
    ///
    /// Panics on an unknown matcher name.
    pub fn build_context(&self) -> InvocationContext {
        let mut ctx = InvocationContext::new(self.target.clone());
        if let Some(attributes) = &self.attributes {
            ctx = ctx.with_empty_attributes();
            for (k, v) in attributes {
                ctx = ctx.with_attribute(k.clone(), Value::from(v.clone()));
            }
        }
        ctx = ctx.with_arguments(self.arguments.iter().cloned().map(Value::from).collect());
        for (key, name) in &self.matchers {
            let matcher = custom_matcher(name)
                .unwrap_or_else(|| panic!("case '{}': unknown matcher '{name}'", self.name));
            ctx = ctx.with_matcher(key.clone(), matcher);
        }
        ctx
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Runner
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of running a single test case
#[derive(Debug)]
pub struct CaseResult {
    pub case_name: String,
    pub passed: bool,
    pub expected: String,
    pub actual: String,
    pub mismatches: Vec<String>,
}

impl Fixture {
    /// Parse a fixture from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Parse multiple fixtures from a YAML file with `---` separators
    pub fn from_yaml_multi(yaml: &str) -> Result<Vec<Self>, serde_yaml::Error> {
        let mut fixtures = Vec::new();
        for doc in serde_yaml::Deserializer::from_str(yaml) {
            fixtures.push(Self::deserialize(doc)?);
        }
        Ok(fixtures)
    }

    /// Run all test cases in order against one injector and return results
    ///
    /// # Panics
    ///
    /// Panics if a rule fails validation.
    pub fn run(&self) -> Vec<CaseResult> {
        let registry = Arc::new(StatusRegistry::new());
        let mut states: HashMap<String, Arc<ExperimentState>> = HashMap::new();
        for (index, config) in self.rules.iter().cloned().enumerate() {
            let rule = config
                .into_rule(index)
                .unwrap_or_else(|e| panic!("fixture '{}': {e}", self.name));
            let state = registry.register(rule);
            if let Some(id) = state.rule().id() {
                states.insert(id.to_owned(), Arc::clone(&state));
            }
        }

        let actions = TestActions::new();
        let injector = Injector::builder(registry, Arc::new(actions.table())).build();

        self.cases
            .iter()
            .map(|case| {
                let mut ctx = case.build_context();
                let mut decision = injector.inject_traced(&mut ctx);
                for _ in 1..case.repeat {
                    ctx = case.build_context();
                    decision = injector.inject_traced(&mut ctx);
                }
                check(case, &decision, &ctx, &states)
            })
            .collect()
    }

    /// Run all test cases and panic on first failure
    pub fn run_and_assert(&self) {
        for result in self.run() {
            assert!(
                result.passed,
                "Fixture '{}' case '{}' failed: expected {}, got {} ({})",
                self.name,
                result.case_name,
                result.expected,
                result.actual,
                result.mismatches.join("; ")
            );
        }
    }
}

fn check(
    case: &TestCase,
    decision: &Decision,
    ctx: &InvocationContext,
    states: &HashMap<String, Arc<ExperimentState>>,
) -> CaseResult {
    let mut mismatches = Vec::new();

    if decision.kind() != case.expect {
        mismatches.push(format!("decision {decision}"));
    }

    if let Some(expected) = &case.expect_rule {
        let actual = decision.rule().and_then(|r| r.id());
        if actual != Some(expected.as_str()) {
            mismatches.push(format!("rule {actual:?}, expected {expected}"));
        }
    }

    for (name, expected) in &case.expect_flags {
        if ctx.flag(name) != Some(expected.as_str()) {
            mismatches.push(format!("flag {name}={:?}, expected {expected}", ctx.flag(name)));
        }
    }

    for (id, expected) in &case.counts {
        match states.get(id) {
            Some(state) if state.count() == *expected => {}
            Some(state) => {
                mismatches.push(format!("count[{id}]={}, expected {expected}", state.count()));
            }
            None => mismatches.push(format!("no rule with id {id}")),
        }
    }

    CaseResult {
        case_name: case.name.clone(),
        passed: mismatches.is_empty(),
        expected: case.expect.clone(),
        actual: decision.kind().to_owned(),
        mismatches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"
name: inline
description: two calls share one counter
rules:
  - id: once
    target: dubbo
    action: delay
    matcher: { method: foo, effect-count: 1 }
    flags: { time: 3000 }
cases:
  - name: first
    target: dubbo
    attributes: { method: foo }
    expect: fired
    expect_rule: once
    expect_flags: { time: "3000" }
    counts: { once: 1 }
  - name: second
    target: dubbo
    attributes: { method: foo }
    expect: limited
    counts: { once: 1 }
"#;

    #[test]
    fn inline_fixture_passes() {
        Fixture::from_yaml(FIXTURE).unwrap().run_and_assert();
    }

    #[test]
    fn mismatches_are_reported() {
        let mut fixture = Fixture::from_yaml(FIXTURE).unwrap();
        fixture.cases[1].expect = "fired".into();
        let results = fixture.run();
        assert!(results[0].passed);
        assert!(!results[1].passed);
        assert_eq!(results[1].actual, "limited");
    }

    #[test]
    fn multi_document_yaml() {
        let yaml = format!("{FIXTURE}---{FIXTURE}");
        assert_eq!(Fixture::from_yaml_multi(&yaml).unwrap().len(), 2);
    }
}
