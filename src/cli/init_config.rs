use super::config::{default_config_path, default_database_path, NodeConfig};
use std::path::PathBuf;

/// Write a commented default configuration file
///
/// Refuses to replace an existing file unless `force` is set.
pub fn execute(
    config_path: Option<String>,
    database_path: Option<String>,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let database_path = database_path
        .map(PathBuf::from)
        .unwrap_or_else(default_database_path);

    if config_path.exists() && !force {
        return Err(format!(
            "Config file '{}' already exists (use --force to overwrite)",
            config_path.display()
        )
        .into());
    }

    NodeConfig::create_default(&config_path, &database_path)?;
    println!("Created: {}", config_path.display());
    println!("Database: {}", database_path.display());
    Ok(())
}
