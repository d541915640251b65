//! Config types for rule sets and engine settings.
//!
//! These types mirror the runtime types but are serde-deserializable, so rule
//! sets can be authored in YAML or JSON and loaded into a [`StatusRegistry`].
//!
//! | Config type | Runtime type | Loader |
//! |-------------|-------------|--------|
//! | [`RuleConfig`] | [`ExperimentRule`] | [`RuleConfig::into_rule()`] |
//! | [`RuleSetConfig`] | rules in a [`StatusRegistry`] | [`StatusRegistry::load()`] |
//! | [`EngineConfig`] | [`Injector`](crate::Injector) settings | [`InjectorBuilder::config()`] |
//!
//! ```yaml
//! rules:
//!   - id: slow-foo
//!     target: dubbo
//!     action: delay
//!     matcher:
//!       method: foo
//!       effect-count: 2
//!     param_exp: "arg0 > 10"
//!     flags:
//!       time: 3000
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::matcher::compile_full_match;
use crate::rule::is_regex_key;
use crate::{
    ArgExpressionEngine, ConfigError, ExperimentRule, ExpressionEngine, InjectorBuilder, Limit,
    StatusRegistry, Value, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL,
};

/// Configuration for one [`ExperimentRule`].
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    /// Optional experiment id, used for unregistering and in logs.
    #[serde(default)]
    pub id: Option<String>,

    /// Target the rule applies to.
    pub target: String,

    /// Action to dispatch.
    pub action: String,

    /// Conditions. Omit entirely to match every call of the target; an empty
    /// map matches nothing.
    #[serde(default)]
    pub matcher: Option<BTreeMap<String, serde_json::Value>>,

    /// Parameter expression over `arg0..argN`.
    #[serde(default)]
    pub param_exp: Option<String>,

    /// Static action flags. Values must be strings, numbers or booleans.
    #[serde(default)]
    pub flags: BTreeMap<String, serde_json::Value>,
}

impl RuleConfig {
    /// Validate and convert into a runtime rule. `index` is used in errors.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingField`] — blank `target` or `action`
    /// - [`ConfigError::InvalidLimit`] — malformed `effect-count` / `effect-percent`
    /// - [`ConfigError::InvalidPattern`] — a `-regex` condition does not compile
    /// - [`ConfigError::InvalidFlag`] — a flag value is not a scalar
    /// - [`ConfigError::InvalidExpression`] — the parameter expression does not
    ///   compile with [`ArgExpressionEngine`]
    pub fn into_rule(self, index: usize) -> Result<ExperimentRule, ConfigError> {
        if self.target.trim().is_empty() {
            return Err(ConfigError::MissingField {
                index,
                field: "target",
            });
        }
        if self.action.trim().is_empty() {
            return Err(ConfigError::MissingField {
                index,
                field: "action",
            });
        }

        let mut rule = ExperimentRule::new(self.target, self.action);
        if let Some(id) = self.id {
            rule = rule.with_id(id);
        }
        if let Some(expression) = self.param_exp {
            rule = rule.with_param_exp(expression);
        }

        if let Some(matcher) = self.matcher {
            rule = rule.with_empty_matcher();
            for (key, json) in matcher {
                let expected = Value::from(json);
                if is_regex_key(&key) {
                    let pattern = expected.to_string();
                    if let Err(e) = compile_full_match(&pattern) {
                        return Err(ConfigError::InvalidPattern {
                            index,
                            key,
                            pattern,
                            message: e.to_string(),
                        });
                    }
                }
                rule = rule.with_condition(key, expected);
            }
        }

        for (name, json) in self.flags {
            let value = match json {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => return Err(ConfigError::InvalidFlag { index, flag: name }),
            };
            rule = rule.with_flag(name, value);
        }

        Limit::of(&rule).map_err(|source| ConfigError::InvalidLimit { index, source })?;

        if let Some(expression) = rule.param_exp().filter(|e| !e.trim().is_empty()) {
            if let Err(source) = ArgExpressionEngine.compile(&expression) {
                return Err(ConfigError::InvalidExpression {
                    index,
                    expression,
                    source,
                });
            }
        }
        Ok(rule)
    }
}

/// A list of rules, registered in file order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleSetConfig {
    /// The rules.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl RuleSetConfig {
    /// Validate every rule.
    ///
    /// # Errors
    ///
    /// Returns the first invalid rule's error.
    pub fn into_rules(self) -> Result<Vec<ExperimentRule>, ConfigError> {
        self.rules
            .into_iter()
            .enumerate()
            .map(|(index, rule)| rule.into_rule(index))
            .collect()
    }
}

impl StatusRegistry {
    /// Validate `config` and register its rules in order.
    ///
    /// Nothing is registered unless every rule is valid. Returns the number
    /// of rules registered.
    ///
    /// # Errors
    ///
    /// Returns the first invalid rule's error.
    pub fn load(&self, config: RuleSetConfig) -> Result<usize, ConfigError> {
        let rules = config.into_rules()?;
        let count = rules.len();
        for rule in rules {
            self.register(rule);
        }
        Ok(count)
    }
}

/// Engine settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Settings for the compiled expression and pattern caches.
    pub expression_cache: CacheConfig,
}

/// Compile cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Idle expiry in seconds.
    pub ttl_secs: u64,

    /// Maximum number of entries.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
            max_entries: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl CacheConfig {
    /// Idle expiry as a `Duration`.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl InjectorBuilder {
    /// Apply engine settings.
    #[must_use]
    pub fn config(self, config: &EngineConfig) -> Self {
        self.cache_ttl(config.expression_cache.ttl())
            .cache_capacity(config.expression_cache.max_entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExperimentRegistry, ExpressionError, LimitError};

    fn rule_from_yaml(yaml: &str) -> Result<ExperimentRule, ConfigError> {
        let config: RuleConfig = serde_yaml::from_str(yaml).unwrap();
        config.into_rule(0)
    }

    #[test]
    fn full_rule_from_yaml() {
        let rule = rule_from_yaml(
            r#"
id: slow-foo
target: dubbo
action: delay
matcher:
  method: foo
  effect-count: 2
param_exp: "arg0 > 10"
flags:
  time: 3000
  async: true
"#,
        )
        .unwrap();

        assert_eq!(rule.id(), Some("slow-foo"));
        assert_eq!(rule.target(), "dubbo");
        assert_eq!(rule.action(), "delay");
        assert_eq!(rule.condition("method"), Some(&Value::from("foo")));
        assert_eq!(Limit::of(&rule), Ok(Limit::Count(2)));
        assert_eq!(rule.param_exp().as_deref(), Some("arg0 > 10"));
        assert_eq!(rule.flags().get("time").map(String::as_str), Some("3000"));
        assert_eq!(rule.flags().get("async").map(String::as_str), Some("true"));
    }

    #[test]
    fn absent_and_empty_matchers_stay_distinct() {
        let open = rule_from_yaml("target: t\naction: a\n").unwrap();
        assert!(open.matcher().is_none());

        let closed = rule_from_yaml("target: t\naction: a\nmatcher: {}\n").unwrap();
        assert!(closed.matcher().is_some_and(BTreeMap::is_empty));
    }

    #[test]
    fn blank_fields_rejected() {
        assert!(matches!(
            rule_from_yaml("target: ' '\naction: a\n"),
            Err(ConfigError::MissingField {
                field: "target",
                ..
            })
        ));
        assert!(matches!(
            rule_from_yaml("target: t\naction: ''\n"),
            Err(ConfigError::MissingField {
                field: "action",
                ..
            })
        ));
    }

    #[test]
    fn bad_limits_rejected() {
        let err = rule_from_yaml("target: t\naction: a\nmatcher:\n  effect-percent: 150\n")
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidLimit {
                source: LimitError::InvalidPercent(_),
                ..
            }
        ));
    }

    #[test]
    fn bad_regex_rejected() {
        let err = rule_from_yaml("target: t\naction: a\nmatcher:\n  host-regex: '[oops'\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { ref key, .. } if key == "host-regex"));
    }

    #[test]
    fn bad_param_expression_rejected() {
        let err = rule_from_yaml("target: t\naction: a\nparam_exp: '(arg0 > 1'\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidExpression {
                ref expression,
                source: ExpressionError::Syntax { .. },
                ..
            } if expression == "(arg0 > 1"
        ));

        let err = rule_from_yaml("target: t\naction: a\nmatcher:\n  param-exp: '((('\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidExpression { index: 0, .. }));

        // Unbound variables are a runtime matter, not a load error.
        assert!(rule_from_yaml("target: t\naction: a\nparam_exp: 'arg7 == 1'\n").is_ok());
        assert!(rule_from_yaml("target: t\naction: a\nparam_exp: '  '\n").is_ok());
    }

    #[test]
    fn structured_flags_rejected() {
        let err = rule_from_yaml("target: t\naction: a\nflags:\n  nested: [1, 2]\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFlag { ref flag, .. } if flag == "nested"));
    }

    #[test]
    fn load_is_all_or_nothing() {
        let json = r#"{
            "rules": [
                { "target": "t", "action": "a" },
                { "target": "t", "action": "b", "matcher": { "effect-count": "x" } }
            ]
        }"#;
        let config: RuleSetConfig = serde_json::from_str(json).unwrap();
        let registry = StatusRegistry::new();
        let err = registry.load(config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLimit { index: 1, .. }));
        assert!(registry.is_empty());

        let config: RuleSetConfig = serde_json::from_str(
            r#"{ "rules": [ { "target": "t", "action": "a" }, { "target": "t", "action": "b" } ] }"#,
        )
        .unwrap();
        assert_eq!(registry.load(config).unwrap(), 2);
        let actions: Vec<String> = registry
            .experiments_for_target("t")
            .iter()
            .map(|s| s.rule().action().to_owned())
            .collect();
        assert_eq!(actions, vec!["a", "b"]);
    }

    #[test]
    fn engine_config_defaults() {
        let config: EngineConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.expression_cache.ttl(), Duration::from_secs(3600));
        assert_eq!(config.expression_cache.max_entries, 1024);

        let config: EngineConfig =
            serde_yaml::from_str("expression_cache:\n  ttl_secs: 60\n").unwrap();
        assert_eq!(config.expression_cache.ttl(), Duration::from_secs(60));
        assert_eq!(config.expression_cache.max_entries, 1024);
    }
}
