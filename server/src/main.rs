use clap::Parser;
use log::info;
use server::coordinator::Coordinator;
use server::network::Gateway;
use server::source::FileQuestionSource;
use std::path::PathBuf;

/// Main-method of the application.
/// Parses command-line arguments, loads the quiz catalog, then runs the
/// gateway and the coordinator until interrupted.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "3000")]
        port: u16,
        /// Path to the JSON quiz catalog
        #[clap(short, long, default_value = "quizzes.json")]
        quizzes: PathBuf,
    }

    env_logger::init();
    let args = Args::parse();

    let source = FileQuestionSource::from_path(&args.quizzes)?;
    let coordinator = Coordinator::new(Box::new(source));
    let cmd_tx = coordinator.command_sender();

    let address = format!("{}:{}", args.host, args.port);
    let gateway = Gateway::bind(&address).await?;

    let coordinator_handle = tokio::spawn(coordinator.run());
    let gateway_handle = tokio::spawn(gateway.run(cmd_tx));

    info!("Server started successfully");

    // Handle shutdown gracefully
    tokio::select! {
        result = coordinator_handle => {
            if let Err(e) = result {
                eprintln!("Coordinator task panicked: {}", e);
            }
        }
        result = gateway_handle => {
            if let Err(e) = result {
                eprintln!("Gateway task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
