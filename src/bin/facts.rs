use std::process::ExitCode;

use enricher::prompt::Variant;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    enricher::setup_logging();

    match enricher::worker::run(Variant::MotorcycleFacts).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Worker failed: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
