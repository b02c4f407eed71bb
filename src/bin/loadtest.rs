use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use admission_gateway::config::LoadArgs;
use admission_gateway::LoadGenerator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = LoadArgs::parse();

    // quiet by default so the report stays readable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if !args.json {
        println!("URL: {}", args.url);
        println!("API Key Header: {}", args.api_key);
        println!("Requests: {}", args.requests);
        println!("Concurrency: {}", args.concurrency);
        println!("Starting the test");
    }

    let generator = LoadGenerator::new(args.plan())?;
    let report = generator.run().await;

    if args.json {
        let json = serde_json::to_string_pretty(&report).context("failed to encode report")?;
        println!("{}", json);
    } else {
        println!();
        print!("{}", report);
    }

    Ok(())
}
