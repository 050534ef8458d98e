use clap::Parser;
use tracing_subscriber::EnvFilter;

use drost_gateway::cli::{load_config, report_issues, Cli, Command, ConfigCommand};
use drost_gateway::{Supervisor, SupervisorOptions, RESTART_EXIT_CODE};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let config = load_config(&cli.config)?;
            if !report_issues(&config) {
                anyhow::bail!("config validation failed");
            }
            let code = run(config).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            init_tracing();
            let config = load_config(&cli.config)?;
            if !report_issues(&config) {
                std::process::exit(1);
            }
            println!("config ok");
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let config = load_config(&cli.config)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("drost {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,drost_gateway=debug")),
        )
        .json()
        .init();
}

/// Run the gateway until a stop signal or a restart request.
///
/// Exit codes are a contract with the external supervisor: 0 on clean
/// stop, 42 when a re-launch is requested.
async fn run(config: drost_domain::config::Config) -> anyhow::Result<i32> {
    let supervisor = Supervisor::new(config, SupervisorOptions::default());
    supervisor.start().await?;

    let mut exit_rx = supervisor.subscribe_exit();
    let code = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received; stopping");
            supervisor.stop().await;
            0
        }
        changed = exit_rx.changed() => {
            match changed {
                Ok(()) => exit_rx.borrow().unwrap_or(RESTART_EXIT_CODE),
                Err(_) => 0,
            }
        }
    };
    Ok(code)
}
