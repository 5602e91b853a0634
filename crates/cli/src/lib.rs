pub mod commands;
pub mod util;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "xmldb", version, about = "Query XML collections with index-aware path expressions")]
pub struct Cli {
    /// Log filter, e.g. `debug` or `xmldb_xquery=trace`. Falls back to `RUST_LOG`.
    #[arg(long = "log-level", global = true, value_name = "FILTER")]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate an expression against documents loaded from disk.
    Query(commands::query::QueryArgs),
    /// Show the compiled expression tree and its pragmas.
    Explain(commands::explain::ExplainArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref())?;

    let output = match &cli.command {
        Command::Query(args) => commands::query::run(args)?,
        Command::Explain(args) => commands::explain::run(args)?,
    };

    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

fn init_tracing(level: Option<&str>) -> anyhow::Result<()> {
    let filter = match level {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn parses_query_arguments() {
        let cli = Cli::try_parse_from([
            "xmldb",
            "--log-level",
            "debug",
            "query",
            "--data",
            "books",
            "--repeat",
            "3",
            "--format",
            "json",
            "//book",
        ])
        .expect("parse");
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        let Command::Query(args) = cli.command else { panic!("expected query") };
        assert_eq!(args.expression, "//book");
        assert_eq!(args.repeat, 3);
        assert_eq!(args.format, OutputFormat::Json);
    }

    #[rstest]
    fn rejects_zero_repeat() {
        assert!(Cli::try_parse_from(["xmldb", "query", "--repeat", "0", "//book"]).is_err());
    }
}
