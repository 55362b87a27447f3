use pixrefiner_api::tracing_config;

pub async fn run(config: pixrefiner_api::config::Config) -> Result<(), anyhow::Error> {
    tracing_config::configure("pixrefiner", std::io::stdout)?;

    let server = pixrefiner_api::run_server(config).await?;
    server.server.await?;
    Ok(())
}
