use anyhow::{Context, Result};
use clap::Parser;
use rastro::cli::{Cli, Command, OutputFormat, PatternArgs};
use rastro::config::CoreConfig;
use rastro::context::{
    probe, AmbientContext, FlowContext, FlowGuard, OperationContext, RequestContext,
    TRANSACTION_KEY,
};
use rastro::trie::{parse_patterns, Pattern, PatternSet, TrieNode};
use std::fs;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber
///
/// `--debug` turns on everything at TRACE; otherwise `RUST_LOG` wins over the
/// configured filter.
fn init_tracing(debug: bool, configured: &str) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Collect patterns from `--pattern` flags and `--file`
fn load_patterns(args: &PatternArgs) -> Result<Vec<Pattern>> {
    let mut patterns = Vec::new();
    for raw in &args.patterns {
        let pattern = raw
            .parse::<Pattern>()
            .with_context(|| format!("Invalid pattern: {raw:?}"))?;
        patterns.push(pattern);
    }
    if let Some(path) = &args.file {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read pattern file: {}", path.display()))?;
        let parsed = parse_patterns(&content)
            .with_context(|| format!("Invalid pattern file: {}", path.display()))?;
        patterns.extend(parsed);
    }
    Ok(patterns)
}

fn print_tree(root: &TrieNode<Pattern>) {
    for (depth, node) in root.iter_with_depth() {
        println!("{}{}", "  ".repeat(depth), node.data());
    }
}

fn run_trie(args: &PatternArgs, format: OutputFormat) -> Result<()> {
    let set = PatternSet::new(load_patterns(args)?);
    let root = set.snapshot();
    match format {
        OutputFormat::Text => print_tree(&root),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(root.as_ref())
                .context("Failed to serialize pattern trie")?;
            println!("{json}");
        }
    }
    Ok(())
}

fn run_match(name: &str, args: &PatternArgs, all: bool) -> Result<()> {
    let set = PatternSet::new(load_patterns(args)?);
    if all {
        let matches = set.matches(name);
        if matches.is_empty() {
            println!("no match");
        }
        for pattern in matches {
            println!("{pattern}");
        }
    } else {
        match set.best_match(name) {
            Some(pattern) => println!("{pattern}"),
            None => println!("no match"),
        }
    }
    Ok(())
}

fn run_probe(config: &CoreConfig, outside_flow: bool, in_request: bool, in_operation: bool) {
    let mut scopes: Vec<FlowGuard> = Vec::new();
    if !outside_flow {
        scopes.push(FlowContext::default().attach());
    }
    if in_request {
        scopes.push(RequestContext::new("GET", "/probe").enter());
    }
    if in_operation {
        scopes.push(OperationContext::new("probe", "run").enter());
    }

    let factories = config.storage_factories::<String>();
    let outcome = probe(TRANSACTION_KEY, &factories);

    match &outcome.active {
        Some(backend) => println!(
            "selected: {} (priority {}, available now: {})",
            backend.name(),
            backend.priority(),
            if backend.can_provide() { "yes" } else { "no" }
        ),
        None => println!("selected: none"),
    }
    println!("candidates: {}", outcome.candidates.join(", "));
    if !outcome.unavailable.is_empty() {
        println!("not providing: {}", outcome.unavailable.join(", "));
    }
    for failure in &outcome.rejected {
        println!("rejected: {failure}");
    }

    let ambient = AmbientContext::new(TRANSACTION_KEY, &factories);
    println!("lookup order: {}", ambient.primary_names().join(", "));
    println!("async: {}", ambient.async_name().unwrap_or("none"));
    match ambient.attach("probe".to_string()) {
        Some(name) => println!("attach uses: {name}"),
        None => println!("attach uses: none"),
    }
    ambient.remove_outstanding(true, true);

    // Leave the innermost scope first.
    while let Some(scope) = scopes.pop() {
        drop(scope);
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let config = CoreConfig::load(args.config.as_deref())?;
    init_tracing(args.debug, &config.logging.filter);

    match &args.command {
        Command::Trie { patterns, format } => run_trie(patterns, *format)?,
        Command::Match {
            name,
            patterns,
            all,
        } => run_match(name, patterns, *all)?,
        Command::Probe {
            outside_flow,
            in_request,
            in_operation,
        } => run_probe(&config, *outside_flow, *in_request, *in_operation),
    }

    Ok(())
}
