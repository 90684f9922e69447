//! CLI tool to validate a mapping policy file
//!
//! Usage:
//!   cargo run --bin check-policy -- policy/testcam.yaml
//!   cargo run --bin check-policy -- policy/testcam.yaml --strict --summary
//!
//! Exit codes: 0 = valid, 1 = invalid or unreadable, 2 = composite
//! reference cycles.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

// Import from the main crate
use obsmap::config::Config;
use obsmap::policy::{CompositeAnalyzer, KeySet, PolicyVerifier};
use obsmap::registry::{parse_policy, PolicyRegistry};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn usage(program: &str) {
    eprintln!(
        "Usage: {} <policy.yaml> [--strict] [--summary] [--json]",
        program
    );
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} policy/testcam.yaml", program);
    eprintln!("  {} policy/testcam.yaml --strict --summary", program);
    eprintln!("  {} testcam                (resolved against OBSMAP_POLICY_DIR)", program);
}

fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,obsmap=warn")))
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = env::args().collect();

    let mut file = None;
    let mut strict = false;
    let mut summary = false;
    let mut json = false;

    for arg in &args[1..] {
        match arg.as_str() {
            "--strict" => strict = true,
            "--summary" => summary = true,
            "--json" => json = true,
            other if !other.starts_with("--") && file.is_none() => {
                file = Some(other.to_string());
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                usage(&args[0]);
                process::exit(1);
            }
        }
    }

    let file = match file {
        Some(file) => file,
        None => {
            usage(&args[0]);
            process::exit(1);
        }
    };

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Error reading configuration: {}", e);
        process::exit(1);
    });
    let strict = strict || config.strict;
    let keys = KeySet::builtin().with_extra(config.extra_keys.iter().cloned());

    // A bare policy name is resolved against the policy directory.
    let path = if Path::new(&file).exists() {
        PathBuf::from(&file)
    } else {
        let fallback = config.policy_path(&file);
        if !fallback.exists() {
            eprintln!("Error: Path does not exist: {}", file);
            process::exit(1);
        }
        fallback
    };

    let source = match fs::read_to_string(&path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading {}: {}", path.display(), e);
            process::exit(1);
        }
    };

    let policy = match parse_policy(&source, &path.display().to_string()) {
        Ok(policy) => policy,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let report = PolicyVerifier::with_keys(keys.clone())
        .with_strict(strict)
        .verify(&policy);

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error serializing report: {}", e);
                process::exit(1);
            }
        }
    }

    if !report.passed {
        if !json {
            print!("{}", report.error_log());
        }

        // Cycles get their own exit code so callers can tell structural
        // breakage from ordinary field problems.
        if report.composites.cycles.is_empty() {
            process::exit(1);
        }
        process::exit(2);
    }

    if !json {
        println!(
            "OK: {} ({} dataset types)",
            path.display(),
            policy.entry_count()
        );

        if report.warning_count() > 0 {
            println!();
            print!("{}", report.warning_log());
        }

        if summary {
            let registry = match PolicyRegistry::with_keys(&policy, keys) {
                Ok(registry) => registry,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                }
            };

            println!();
            print!("{}", registry.format_summary());

            let analyzer = CompositeAnalyzer::new();
            let analysis = analyzer.analyze(&policy);
            if analysis.composite_count() > 0 {
                println!();
                print!("{}", analyzer.format_analysis(&analysis));
            }
        }
    }
}
