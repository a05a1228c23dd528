use clap::Parser;

#[derive(Parser)]
#[command(name = "recheck")]
#[command(version = "0.4.0")]
#[command(about = "Records real API traffic as test cases and replays it against new builds")]
pub struct Args {
    /// Port for the regression API server
    #[arg(long, default_value = "8081")]
    pub port: u16,

    /// Also serve the bundled demo CRUD API (sample instrumentation target)
    #[arg(long)]
    pub demo: bool,

    /// Port for the demo API server
    #[arg(long, default_value = "8080")]
    pub demo_port: u16,

    /// Disable variance-based capture deduplication
    #[arg(long)]
    pub no_dedup: bool,

    /// Disable anonymous usage telemetry
    #[arg(long)]
    pub no_telemetry: bool,
}
