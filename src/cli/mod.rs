use clap::{Parser, Subcommand};

pub mod config;
pub mod init_config;
pub mod run;
pub mod version;

#[derive(Parser)]
#[command(name = "zkattest")]
#[command(author = "zkattest developers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Attribute attestation node with zero-knowledge verification", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the attestation node
    Run {
        /// Path to config file (default: ~/.local/share/zkattest/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// UDP address to bind, overriding the config file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Write a commented default configuration file
    InitConfig {
        /// Where to write the config file (default: ~/.local/share/zkattest/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Attestation database path to put in the file
        #[arg(long)]
        database_path: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Display version information
    Version,
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run { config, bind } => run::execute(config, bind).await,
        Commands::InitConfig {
            config,
            database_path,
            force,
        } => init_config::execute(config, database_path, force),
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "zkattest",
            "run",
            "--config",
            "/tmp/node.toml",
            "--bind",
            "127.0.0.1:9000",
        ])
        .unwrap();

        match cli.command {
            Commands::Run { config, bind } => {
                assert_eq!(config.as_deref(), Some("/tmp/node.toml"));
                assert_eq!(bind.as_deref(), Some("127.0.0.1:9000"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_init_config() {
        let cli = Cli::try_parse_from(["zkattest", "init-config", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::InitConfig { force: true, config: None, .. }
        ));
    }

    #[test]
    fn test_unknown_subcommand_rejected() {
        assert!(Cli::try_parse_from(["zkattest", "register"]).is_err());
    }
}
