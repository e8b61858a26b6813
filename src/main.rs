//! dbexec - run pre-approved, parameterized SQL inside a single transaction.

use db_exec::catalog::QueryCatalog;
use db_exec::cli::Cli;
use db_exec::config::{self, ConnectionConfig};
use db_exec::db;
use db_exec::error::{DbExecError, Result};
use db_exec::logging;
use db_exec::report::ReportWriter;
use db_exec::runner::TransactionRunner;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let dotenv = config::load_dotenv();
    let cli = Cli::parse_args();
    logging::init_stderr_logging(cli.verbose);
    dotenv.log();

    match run(&cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{}: {}", e.category(), e);
            std::process::exit(1);
        }
    }
}

/// Returns whether the request succeeded (committed or finished its dry run).
async fn run(cli: &Cli) -> Result<bool> {
    cli.validate()?;
    let writer = ReportWriter::new(cli.parse_output_format().map_err(DbExecError::config)?);

    let catalog = QueryCatalog::load(&cli.definitions)?;

    if cli.list {
        print!("{}", writer.format_catalog(&catalog));
        return Ok(true);
    }

    let request = cli.to_request()?;
    let connection = ConnectionConfig::resolve(cli.database_url.as_deref())?;
    info!("Connecting to {}", connection.display_string());
    let store = db::connect(&connection).await?;

    let result = TransactionRunner::new(&catalog)
        .run(store.as_ref(), &request)
        .await;

    if let Err(e) = store.close().await {
        warn!("Failed to close connection: {e}");
    }

    let report = result?;
    print!("{}", writer.format_report(&report));

    if let Some(e) = &report.error {
        error!("{}: {}", e.category(), e);
    }
    Ok(report.is_success())
}
