//! tapwire-hook - forwards coding-agent hook events to the Tapwire dashboard.
//!
//! Configure it as a hook command; it reads the hook payload from stdin and
//! exits with the code the dashboard returns (0 when it is unreachable).

use clap::Parser;
use tapwire_app::{relay, DEFAULT_HOOK_URL};
use tokio::io::AsyncReadExt;

/// Forward a hook event read from stdin to the Tapwire dashboard
#[derive(Parser, Debug)]
#[command(name = "tapwire-hook", version, about)]
struct Args {
    /// Ingestion endpoint
    #[arg(long, env = "TAPWIRE_HOOK_URL", default_value = DEFAULT_HOOK_URL)]
    url: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Bad arguments must not block the agent either.
    let url = Args::try_parse()
        .map(|args| args.url)
        .unwrap_or_else(|_| DEFAULT_HOOK_URL.to_string());

    let mut stdin = String::new();
    let _ = tokio::io::stdin().read_to_string(&mut stdin).await;

    let response = relay(&url, &stdin).await;

    if !response.stdout.is_empty() {
        println!("{}", response.stdout);
    }
    if !response.stderr.is_empty() {
        eprintln!("{}", response.stderr);
    }

    std::process::exit(response.exit_code);
}
