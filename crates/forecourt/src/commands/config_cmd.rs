//! Config subcommand handlers.

use forecourt_config::{Config, config_path, save_config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = global.config.clone().unwrap_or_else(config_path);

    match args.command {
        ConfigCommand::Show => {
            let config = super::load(global)?;
            print!("{}", config.to_toml()?);
        }

        ConfigCommand::Path => println!("{}", path.display()),

        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            save_config(&Config::default(), &path)?;
            eprintln!("Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}
