//! anpx-ctl — command-line interface for the ANPX Gateway's admin routes.

use anyhow::{Context, Result};

mod cmd;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";

fn print_usage() {
    println!("Usage: anpx-ctl [--addr <host:port>] <command>");
    println!();
    println!("Commands:");
    println!("  health                          Liveness and connection/pending counts");
    println!("  stats                           Aggregate connection and routing counters");
    println!();
    println!(
        "Options:\n  --addr <host:port>              Gateway HTTP address (default: {})",
        DEFAULT_ADDR
    );
    println!();
    println!("Examples:");
    println!("  anpx-ctl health");
    println!("  anpx-ctl --addr 127.0.0.1:8080 stats");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut addr = DEFAULT_ADDR.to_string();
    let mut remaining: Vec<String> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--addr" {
            i += 1;
            addr = args.get(i).context("--addr requires a value")?.clone();
        } else {
            remaining.push(args[i].clone());
        }
        i += 1;
    }

    let remaining_refs: Vec<&str> = remaining.iter().map(|s| s.as_str()).collect();

    match remaining_refs.as_slice() {
        ["health"] | [] => cmd::admin::cmd_health(&addr).await,
        ["stats"] => cmd::admin::cmd_stats(&addr).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
