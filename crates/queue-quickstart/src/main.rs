use clap::Parser;
use queue_quickstart::{initialize_logging, run_cli, Cli, QuickstartError};
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match initialize_logging(&cli) {
        Ok(()) => run_cli(&cli, &mut std::io::stdout()).await.map(|_| ()),
        Err(e) => Err(e),
    };

    // Service failures were already reported and still exit with 0
    if let Err(e) = result {
        error!("Quickstart error: {}", e);
        eprintln!("{}", e);

        // Exit with appropriate code based on error type
        let exit_code = match e {
            QuickstartError::Configuration(_) => 2,
            QuickstartError::InvalidSetting { .. } => 3,
            QuickstartError::Logging { .. } => 4,
            QuickstartError::Teardown { .. } => 5,
            QuickstartError::Io(_) => 6,
        };

        std::process::exit(exit_code);
    }
}
