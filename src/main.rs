use std::sync::Arc;

use clap::Parser;
use colored::*;

use recheck::cli::Args;
use recheck::demo;
use recheck::mem_store::{MemTestCaseStore, MemTestRunStore};
use recheck::regression::Regression;
use recheck::run::RunManager;
use recheck::telemetry::Telemetry;
use recheck::web::{self, AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    println!("{}", "RECHECK REGRESSION SERVER".bright_cyan().bold());
    println!("{}: {}", "API port".bright_yellow(), args.port);
    println!(
        "{}: {}",
        "Dedup".bright_yellow(),
        if args.no_dedup { "off".to_string() } else { "on".bright_green().to_string() }
    );
    println!(
        "{}: {}",
        "Telemetry".bright_yellow(),
        if args.no_telemetry { "off" } else { "on" }
    );
    if args.demo {
        println!("{}: {}", "Demo API port".bright_magenta(), args.demo_port);
    }
    println!("{}", "=".repeat(50).bright_blue());

    let tc_store = Arc::new(MemTestCaseStore::new());
    let run_store = Arc::new(MemTestRunStore::new());
    let telemetry = Arc::new(Telemetry::new(!args.no_telemetry));

    let state = AppState {
        regression: Arc::new(Regression::new(
            tc_store.clone(),
            run_store.clone(),
            telemetry.clone(),
            !args.no_dedup,
        )),
        runs: Arc::new(RunManager::new(run_store, tc_store, telemetry)),
    };

    if args.demo {
        let roster = demo::seed_roster();
        let demo_port = args.demo_port;
        tokio::spawn(async move { demo::serve(roster, demo_port).await });
    }

    web::serve(state, args.port).await;
}
