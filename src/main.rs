#![cfg(not(tarpaulin_include))]

use rusty_todo::app;
use rusty_todo::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;

    // Start the web application
    app::run(config).await?;

    Ok(())
}
