use clap::Parser;
use fixtures::{run_server, FixtureArgs, MockBackend};

/// Mock notes backend fixture server
#[derive(Parser, Debug)]
#[clap(name = "notes-api-fixture")]
struct Cli {
    #[clap(flatten)]
    common: FixtureArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let backend = MockBackend::new();
    run_server(args.common, backend.router()).await
}
