//! Subcommand handlers.

pub mod config_cmd;
pub mod probe;
pub mod run;

use forecourt_config::Config;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Load the layered config, honoring `--config`.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(forecourt_config::load_config(global.config.as_deref())?)
}
