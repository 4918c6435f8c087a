//! Init command - first-run setup.

use crate::cli::Output;
use crate::config::Settings;
use console::style;

/// Write a default configuration file if none exists and point out anything
/// the environment is missing.
pub fn run_init(settings: &Settings) -> anyhow::Result<()> {
    Output::header("Dirigent Setup");
    println!();

    let config_path = Settings::default_config_path();
    if config_path.exists() {
        Output::info(&format!(
            "Configuration already exists at {}",
            config_path.display()
        ));
    } else {
        settings.save()?;
        Output::success(&format!(
            "Wrote default configuration to {}",
            config_path.display()
        ));
    }

    std::fs::create_dir_all(settings.data_dir())?;
    std::fs::create_dir_all(settings.temp_dir())?;
    Output::success(&format!("Data directory: {}", settings.data_dir().display()));

    println!();
    println!("{}", style("Credentials").bold().cyan());
    println!();

    if std::env::var("OPENAI_API_KEY").is_err() {
        Output::warning("OPENAI_API_KEY is not set.");
        println!("  Content generation, summaries, and chat need an OpenAI key:");
        println!("  {}", style("export OPENAI_API_KEY='sk-...'").green());
    } else {
        Output::success("OpenAI API key is configured.");
    }

    if settings.compute.api_key().is_none() {
        Output::warning(&format!(
            "{} is not set.",
            settings.compute.api_key_env
        ));
        println!("  Transcription submissions to GPU endpoints need this key:");
        println!(
            "  {}",
            style(format!("export {}='...'", settings.compute.api_key_env)).green()
        );
    } else {
        Output::success("Compute API key is configured.");
    }

    println!();
    Output::info("Run 'dirigent doctor' to check endpoint health, then 'dirigent serve'.");
    Ok(())
}
