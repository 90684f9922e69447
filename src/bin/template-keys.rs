//! CLI tool to display the substitution key and storage tag tables,
//! or to check a single path template
//!
//! Usage:
//!   cargo run --bin template-keys
//!   cargo run --bin template-keys -- "raw/raw_v%(visit)d_f%(filter)s.fits.gz"

use std::env;
use std::process;

use obsmap::config::Config;
use obsmap::policy::{KeySet, Storage, Template};

fn main() {
    dotenvy::dotenv().ok();

    let args: Vec<String> = env::args().collect();

    let extra_keys = Config::from_env()
        .map(|config| config.extra_keys)
        .unwrap_or_default();
    let keys = KeySet::builtin().with_extra(extra_keys);

    if args.len() == 2 {
        // Check one template
        let template = Template::new(args[1].clone());

        println!("Checking: {}", template);
        println!();

        match template.unknown_keys(&keys) {
            Ok(unknown) if unknown.is_empty() => {
                println!("Result: OK");
                match template.keys() {
                    Ok(used) if used.is_empty() => {
                        println!("  No substitution keys used.");
                    }
                    Ok(used) => {
                        println!("  Keys: {}", used.join(", "));
                    }
                    Err(_) => {}
                }
            }
            Ok(unknown) => {
                println!("Result: UNKNOWN KEYS");
                println!("  These keys are outside the known substitution set!");
                println!("  Keys: {}", unknown.join(", "));
                process::exit(2);
            }
            Err(e) => {
                println!("Result: MALFORMED");
                println!("  This template cannot be parsed!");
                println!("  Reason: {}", e);
                process::exit(1);
            }
        }
    } else if args.len() == 1 {
        // Display full tables
        print!("{}", keys.format_table());
        println!();
        print!("{}", Storage::format_table());
    } else {
        eprintln!("Usage:");
        eprintln!("  {} <template>  - Check a single template", args[0]);
        eprintln!("  {}             - Display key and storage tables", args[0]);
        eprintln!();
        eprintln!("Examples:");
        eprintln!("  {} \"raw/raw_v%(visit)d_f%(filter)s.fits.gz\"", args[0]);
        eprintln!("  {} \"deepCoadd/%(filter)s/%(tract)d/%(patch)s.fits\"", args[0]);
        process::exit(1);
    }
}
