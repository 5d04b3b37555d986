use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::core::Engine;

#[derive(Parser)]
#[command(name = "consilium")]
#[command(about = "Interview-driven project documentation, written by your LLM")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (defaults to ./consilium.json)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Interactively configure the model provider
    Configure,

    /// Run the requirements interview and write the documentation set
    Generate {
        /// Project name; documentation is written to ./<project_name>/docs
        project_name: String,

        /// Discard previously stored answers before starting
        #[arg(long)]
        fresh: bool,
    },
}

impl Cli {
    pub async fn execute(self, mut engine: Engine) -> Result<()> {
        match self.command {
            Commands::Configure => engine.configure().await,
            Commands::Generate { project_name, fresh } => engine.generate(&project_name, fresh).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_generate_with_fresh_flag() {
        let cli = Cli::try_parse_from(["consilium", "--verbose", "generate", "atlas", "--fresh"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Generate { project_name, fresh } => {
                assert_eq!(project_name, "atlas");
                assert!(fresh);
            }
            Commands::Configure => panic!("expected generate"),
        }
    }

    #[test]
    fn generate_requires_project_name() {
        assert!(Cli::try_parse_from(["consilium", "generate"]).is_err());
    }

    #[test]
    fn config_path_is_optional() {
        let cli = Cli::try_parse_from(["consilium", "-c", "alt.json", "configure"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("alt.json")));
        assert!(matches!(cli.command, Commands::Configure));
    }
}
