use crate::cli::ConfigCommands;
use crate::config;
use anyhow::Result;
use std::path::Path;

pub fn run(cmd: ConfigCommands, config_path: &Path, data_dir: Option<&Path>) -> Result<()> {
    match cmd {
        ConfigCommands::Validate => validate(config_path, data_dir),
        ConfigCommands::Show => show(config_path, data_dir),
    }
}

fn validate(config_path: &Path, data_dir: Option<&Path>) -> Result<()> {
    let config = match config::effective(config_path, data_dir) {
        Ok(config) => config,
        Err(e) => anyhow::bail!("{:#}", e),
    };
    let problems = config.problems();
    if problems.is_empty() {
        println!("✅ {} is valid.", config_path.display());
        return Ok(());
    }
    println!("❌ Validation errors in {}:", config_path.display());
    for p in &problems {
        println!("  - {}", p);
    }
    anyhow::bail!("{} problem(s) found", problems.len())
}

fn show(config_path: &Path, data_dir: Option<&Path>) -> Result<()> {
    let config = config::effective(config_path, data_dir)?;
    println!("{}", config::to_toml(&config)?);
    Ok(())
}
