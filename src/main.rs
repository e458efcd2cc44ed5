use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskmaster")]
#[command(about = "A chat agent with long-term memory for your profile and todo list")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Port to bind to (overrides config)
        #[arg(short, long, env = "TASKMASTER_PORT")]
        port: Option<u16>,

        /// Bind address (overrides config)
        #[arg(short, long, env = "TASKMASTER_BIND")]
        bind: Option<String>,
    },

    /// Show resolved configuration
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = taskmaster::config::load()?;

    match cli.command {
        Commands::Serve { port, bind } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(bind) = bind {
                config.gateway.bind = bind;
            }
            taskmaster::gateway::run(config).await
        }
        Commands::Status => {
            println!("taskmaster v{}", env!("CARGO_PKG_VERSION"));
            println!("provider: {} ({})", config.agent.provider, config.agent.model);
            println!(
                "api key: {}",
                if config.agent.api_key.is_some() {
                    "set"
                } else {
                    "missing"
                }
            );
            println!(
                "gateway: {}:{}",
                config.gateway.bind, config.gateway.port
            );
            println!("max update rounds: {}", config.graph.max_update_rounds);
            Ok(())
        }
    }
}
