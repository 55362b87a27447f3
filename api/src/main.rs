use clap::{Parser, Subcommand};

mod cmd;

#[derive(Debug, Parser)]
#[clap(name = "pixrefiner", about = "Convert uploaded images to WebP or AVIF")]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server
    Server(pixrefiner_api::config::Config),
    /// Administrative commands that work directly on the data directory
    Admin(cmd::admin::AdminArgs),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    color_eyre::install()?;
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Server(config) => cmd::server::run(config).await?,
        Command::Admin(args) => cmd::admin::admin_commands(args)?,
    }

    Ok(())
}
