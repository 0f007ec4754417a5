use clap::{ArgAction, Parser};

use bench_dispatch::config::Config;
use bench_dispatch::logger::Logger;
use bench_dispatch::server;

#[derive(Parser, Debug)]
#[command(
    name = "bench-server",
    version,
    about = "Benchmark dispatch server for poker-bot matches",
    long_about = "Loads a configuration file naming the server's games and users, then\n\
                  serves the control protocol: authenticated clients queue matches, the\n\
                  scheduler dispatches them under the configured concurrency budgets, and\n\
                  the server forks a referee and any local bots for each dispatch."
)]
struct Args {
    /// Path to the server's configuration file
    config_file: std::path::PathBuf,

    /// Increase output verbosity (-v verbose, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let logger = Logger::new(args.verbose);

    let config = Config::load(&args.config_file).unwrap_or_else(|e| {
        eprintln!("BM_ERROR: {e}");
        std::process::exit(1);
    });
    logger.verbose(format!(
        "loaded {} game(s) and {} user(s) from {}",
        config.games.len(),
        config.users.len(),
        args.config_file.display()
    ));

    if let Err(e) = server::run(config, logger).await {
        eprintln!("BM_ERROR: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
