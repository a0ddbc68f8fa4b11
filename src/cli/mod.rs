//! CLI command handling
//!
//! Loads the harness configuration, runs scenarios, and formats output.

use std::path::PathBuf;

use colored::Colorize;

use crate::commands::Commands;
use crate::common::{HarnessConfig, Result};
use crate::scenario::{self, Scenario, ScenarioResult};

/// Options shared by every command
#[derive(Debug, Default)]
pub struct GlobalOptions {
    /// Configuration file to use instead of the default location
    pub config: Option<PathBuf>,
    /// Proxy program overriding the configured one
    pub proxy: Option<PathBuf>,
    /// First port of the entry/server/exit block
    pub base_port: Option<u16>,
}

impl GlobalOptions {
    pub fn load_config(&self) -> Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::load_from(path)?,
            None => HarnessConfig::load()?,
        };
        if let Some(program) = &self.proxy {
            config.proxy.program = program.clone();
        }
        if let Some(base) = self.base_port {
            config.ports = crate::common::Ports::block(base)?;
        }
        Ok(config)
    }
}

/// Dispatch a CLI command
///
/// Returns `false` when any scenario failed.
pub async fn dispatch(command: Commands, options: &GlobalOptions) -> Result<bool> {
    let config = options.load_config()?;

    match command {
        Commands::List => {
            for scenario in scenario::catalog(&config)? {
                match &scenario.description {
                    Some(desc) => println!("{}  {}", scenario.name, desc.dimmed()),
                    None => println!("{}", scenario.name),
                }
            }
            Ok(true)
        }

        Commands::Run { filter, json } => {
            let scenarios: Vec<Scenario> = scenario::catalog(&config)?
                .into_iter()
                .filter(|s| filter.as_deref().map_or(true, |f| s.name.contains(f)))
                .collect();
            if scenarios.is_empty() {
                println!("No scenarios match.");
                return Ok(true);
            }
            run_all(&config, &scenarios, json).await
        }

        Commands::RunFile { path, json } => {
            let scenario = scenario::load_scenario(&path, &config.ports)?;
            run_all(&config, std::slice::from_ref(&scenario), json).await
        }
    }
}

async fn run_all(config: &HarnessConfig, scenarios: &[Scenario], json: bool) -> Result<bool> {
    let mut results = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        if !json {
            print_header(scenario);
        }
        let result = scenario::run_scenario(config, scenario).await;
        if !json {
            print_result(&result);
        }
        results.push(result);
    }

    let failed = results.iter().filter(|r| !r.passed).count();
    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_summary(results.len(), failed);
    }
    Ok(failed == 0)
}

fn print_header(scenario: &Scenario) {
    println!(
        "\n{} {}",
        "Running Scenario:".blue().bold(),
        scenario.name.white().bold()
    );
    if let Some(desc) = &scenario.description {
        println!("  {}", desc.dimmed());
    }
}

fn print_result(result: &ScenarioResult) {
    if result.passed {
        println!("  {} {}", "✓".green().bold(), "Passed".green().bold());
        return;
    }

    println!("  {} {}", "✗".red().bold(), "Failed".red().bold());
    for line in result.report.lines() {
        println!("    {}", line);
    }
}

fn print_summary(total: usize, failed: usize) {
    let passed = total - failed;
    if failed == 0 {
        println!(
            "\n{} {}\n",
            "✓".green().bold(),
            format!("{} of {} scenarios passed", passed, total).green().bold()
        );
    } else {
        println!(
            "\n{} {}\n",
            "✗".red().bold(),
            format!("{} of {} scenarios failed", failed, total).red().bold()
        );
    }
}
