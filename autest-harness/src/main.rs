use std::process::ExitCode;

use clap::Parser;

use autest_harness::app;
use autest_harness::cli::HarnessCli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = HarnessCli::parse();

    match app::execute(cli).await {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            tracing::error!(error = %e, "autest aborted");
            eprintln!("autest: {e}");
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}
