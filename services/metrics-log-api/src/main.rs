use common_obs::ObsInit;
use metrics_log_api::config::ServiceConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ObsInit::init()?;

    let config = ServiceConfig::from_env();
    metrics_log_api::run(config).await?;

    Ok(())
}
