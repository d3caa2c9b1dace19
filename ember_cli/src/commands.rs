use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ember")]
#[command(about = "Local wallet request broker with an HTTP approval surface")]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "EMBER_CONFIG_PATH", default_value = "config.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Keep broker state in memory only
    #[arg(long)]
    pub ephemeral: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Run the broker and serve the HTTP API (default)
    Serve,

    /// Write a config file with default values
    InitConfig {
        /// Destination, defaults to the --config path
        path: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default() {
        let cli = Cli::try_parse_from(["ember"]).unwrap();
        assert_eq!(cli.command, None);
        assert!(!cli.ephemeral);
    }

    #[test]
    fn init_config_takes_an_optional_path() {
        let cli = Cli::try_parse_from(["ember", "-c", "a.toml", "init-config", "b.toml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("a.toml"));
        assert_eq!(cli.command, Some(Commands::InitConfig { path: Some(PathBuf::from("b.toml")) }));
    }
}
