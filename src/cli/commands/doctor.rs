//! Doctor command - verify configuration, credentials, and endpoint health.

use crate::cli::Output;
use crate::config::Settings;
use crate::provider::{ComputeProvider, HttpComputeProvider};
use crate::store::SqliteJobStore;
use console::style;

/// Check result for a single item.
#[derive(Debug)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    message: String,
    hint: Option<String>,
}

#[derive(Debug, PartialEq)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.to_string(),
            hint: None,
        }
    }

    fn warning(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn error(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }
}

/// Run all checks and print a report.
pub async fn run_doctor(settings: &Settings) -> anyhow::Result<()> {
    Output::header("Dirigent Doctor");
    println!();

    let mut results = Vec::new();

    let config_path = Settings::default_config_path();
    if config_path.exists() {
        results.push(CheckResult::ok(
            "Configuration",
            &format!("{}", config_path.display()),
        ));
    } else {
        results.push(CheckResult::warning(
            "Configuration",
            "no config file, using defaults",
            "run 'dirigent init' to write one",
        ));
    }

    match SqliteJobStore::new(&settings.sqlite_path()) {
        Ok(_) => results.push(CheckResult::ok(
            "Job store",
            &format!("{}", settings.sqlite_path().display()),
        )),
        Err(e) => results.push(CheckResult::error(
            "Job store",
            &format!("cannot open database: {}", e),
            "check that the data directory is writable",
        )),
    }

    if std::env::var("OPENAI_API_KEY").is_ok() {
        results.push(CheckResult::ok("OpenAI key", "OPENAI_API_KEY is set"));
    } else {
        results.push(CheckResult::error(
            "OpenAI key",
            "OPENAI_API_KEY is not set",
            "export OPENAI_API_KEY='sk-...'",
        ));
    }

    if settings.compute.api_key().is_some() {
        results.push(CheckResult::ok(
            "Compute key",
            &format!("{} is set", settings.compute.api_key_env),
        ));
    } else {
        results.push(CheckResult::error(
            "Compute key",
            &format!("{} is not set", settings.compute.api_key_env),
            "transcription submissions will fail without it",
        ));
    }

    if settings.server.callback_base_url.is_empty() {
        results.push(CheckResult::warning(
            "Webhook callback",
            "callback_base_url is not configured",
            "compute endpoints cannot reach this instance without a public URL",
        ));
    } else {
        results.push(CheckResult::ok(
            "Webhook callback",
            &settings.callback_url(),
        ));
    }

    let provider = HttpComputeProvider::new(settings.compute.api_key());
    for endpoint in &settings.compute.endpoints {
        match provider.health(endpoint).await {
            Some(counts) => results.push(CheckResult::ok(
                &format!("Endpoint '{}'", endpoint.name),
                &format!("{} idle, {} running", counts.idle, counts.running),
            )),
            None => results.push(CheckResult::warning(
                &format!("Endpoint '{}'", endpoint.name),
                "health check failed",
                "the dispatcher will still try it if it is last in preference order",
            )),
        }
    }

    let mut errors = 0;
    for result in &results {
        let (mark, name) = match result.status {
            CheckStatus::Ok => (style("✓").green(), style(&result.name).bold()),
            CheckStatus::Warning => (style("!").yellow(), style(&result.name).bold()),
            CheckStatus::Error => {
                errors += 1;
                (style("✗").red(), style(&result.name).bold())
            }
        };
        println!("  {} {} - {}", mark, name, result.message);
        if let Some(hint) = &result.hint {
            println!("    {} {}", style("→").dim(), style(hint).dim());
        }
    }

    println!();
    if errors == 0 {
        Output::success("All checks passed.");
    } else {
        Output::error(&format!("{} check(s) failed.", errors));
    }
    Ok(())
}
