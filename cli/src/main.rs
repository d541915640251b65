//! saboteur CLI — driving adapter for the saboteur decision core.
//!
//! Subcommands:
//! - `check <rules>` — validate a rule set loads without errors
//! - `eval <rules> --target <t> [--attr key=value...] [--arg value...] [--repeat n]` —
//!   dry-run calls against a rule set with the test executors
//! - `expr <expression> [--arg value...]` — evaluate a parameter expression
//!
//! Logs go to stderr, filtered by `SABOTEUR_LOG` (default `warn`).

use std::process;
use std::sync::Arc;

use saboteur::{
    Injector, InvocationContext, ParamExprEvaluator, RuleSetConfig, StatusRegistry, Value,
};
use saboteur_test::TestActions;
use tracing_subscriber::EnvFilter;

fn main() {
    init_logging();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "check" => cmd_check(&args[2..]),
        "eval" => cmd_eval(&args[2..]),
        "expr" => cmd_expr(&args[2..]),
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("error: unknown command \"{other}\"");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("SABOTEUR_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ═══════════════════════════════════════════════════════════════════════════════
// Commands
// ═══════════════════════════════════════════════════════════════════════════════

fn cmd_check(args: &[String]) -> Result<(), String> {
    let [path] = args else {
        return Err("check requires exactly one rules file path".into());
    };

    let rules = load_rules(path)?
        .into_rules()
        .map_err(|e| format!("rules invalid: {e}"))?;

    println!("Rules valid ({} rules)", rules.len());
    Ok(())
}

fn cmd_eval(args: &[String]) -> Result<(), String> {
    let Some((path, rest)) = args.split_first() else {
        return Err("eval requires a rules file path".into());
    };
    let call = parse_call(rest)?;
    let target = call.target.clone().ok_or("eval requires --target")?;

    let registry = Arc::new(StatusRegistry::new());
    registry
        .load(load_rules(path)?)
        .map_err(|e| format!("rules invalid: {e}"))?;

    let actions = TestActions::new();
    let injector = Injector::builder(registry, Arc::new(actions.table())).build();

    for _ in 0..call.repeat {
        let mut ctx = call.context(&target);
        println!("{}", injector.inject_traced(&mut ctx));
    }
    Ok(())
}

fn cmd_expr(args: &[String]) -> Result<(), String> {
    let Some((expression, rest)) = args.split_first() else {
        return Err("expr requires an expression".into());
    };
    let call = parse_call(rest)?;
    if call.target.is_some() || !call.attributes.is_empty() || call.repeat != 1 {
        return Err("expr only accepts --arg".into());
    }

    let value = ParamExprEvaluator::new()
        .evaluate(expression, &call.arguments)
        .map_err(|e| e.to_string())?;
    println!("{value}");
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Rule loading
// ═══════════════════════════════════════════════════════════════════════════════

fn load_rules(path: &str) -> Result<RuleSetConfig, String> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("failed to read \"{path}\": {e}"))?;

    let is_json = std::path::Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(&content).map_err(|e| format!("JSON parse error: {e}"))
    } else {
        // Default to YAML (handles .yaml and .yml)
        serde_yaml::from_str(&content).map_err(|e| format!("YAML parse error: {e}"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Argument parsing
// ═══════════════════════════════════════════════════════════════════════════════

/// A simulated call assembled from command-line flags.
#[derive(Debug)]
struct CallArgs {
    target: Option<String>,
    attributes: Vec<(String, Value)>,
    arguments: Vec<Value>,
    repeat: usize,
}

impl CallArgs {
    fn context(&self, target: &str) -> InvocationContext {
        let mut ctx = InvocationContext::new(target).with_empty_attributes();
        for (k, v) in &self.attributes {
            ctx = ctx.with_attribute(k.clone(), v.clone());
        }
        ctx.with_arguments(self.arguments.clone())
    }
}

fn parse_call(args: &[String]) -> Result<CallArgs, String> {
    let mut call = CallArgs {
        target: None,
        attributes: Vec::new(),
        arguments: Vec::new(),
        repeat: 1,
    };
    let mut iter = args.iter();

    while let Some(flag) = iter.next() {
        let mut value = || {
            iter.next()
                .ok_or_else(|| format!("{flag} requires a value"))
        };
        match flag.as_str() {
            "--target" => call.target = Some(value()?.clone()),
            "--attr" => {
                let pair = value()?;
                let (key, raw) = pair.split_once('=').ok_or_else(|| {
                    format!("invalid attribute \"{pair}\", expected key=value")
                })?;
                call.attributes.push((key.to_owned(), parse_value(raw)));
            }
            "--arg" => call.arguments.push(parse_value(value()?)),
            "--repeat" => {
                let raw = value()?;
                call.repeat = raw
                    .parse()
                    .map_err(|_| format!("invalid repeat count \"{raw}\""))?;
            }
            other => return Err(format!("unexpected argument \"{other}\"")),
        }
    }

    Ok(call)
}

/// JSON if it parses as JSON, otherwise the raw text as a string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str::<serde_json::Value>(raw)
        .map_or_else(|_| Value::from(raw), Value::from)
}

fn print_usage() {
    eprintln!(
        "Usage: saboteur <command> [options]

Commands:
  check <rules>                                  Validate a rule set
  eval <rules> --target <t> [--attr key=value...] [--arg value...] [--repeat n]
                                                 Dry-run calls against a rule set
  expr <expression> [--arg value...]             Evaluate a parameter expression
  help                                           Show this help

Values given to --attr and --arg are parsed as JSON when possible.
Set SABOTEUR_LOG to control log output (default: warn)."
    );
}
