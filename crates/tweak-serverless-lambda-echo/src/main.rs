//! AWS Lambda entry point for the echo function.

use std::sync::Arc;

use lambda_runtime::Error;
use tweak_serverless::{lambda, package_info, ConfigOverrides, Facade};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let facade = Arc::new(Facade::new(package_info!(), ConfigOverrides::default())?);
    facade.logger().install_global()?;

    lambda::run(tweak_serverless_lambda_echo::build_lifecycle(&facade)).await
}
