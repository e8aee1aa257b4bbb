//! CLI command handling
//!
//! Dispatches CLI commands to the scenario runner and formats output.

use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::Result;
use crate::naming;
use crate::process::ShellRunner;
use crate::report::{SequenceReport, Verdict};
use crate::scenario::{run_scenarios, PreparedScenario, RunSettings};

/// Dispatch a CLI command; `Ok(false)` means some test did not pass
pub async fn dispatch(command: Commands, config: &Config) -> Result<bool> {
    match command {
        Commands::Run {
            files,
            verbose,
            json,
            component,
            max_parallel,
        } => {
            let component = component.as_deref();
            let scenarios = files
                .iter()
                .map(|path| PreparedScenario::load(path, config, component))
                .collect::<Result<Vec<_>>>()?;

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            let settings = RunSettings {
                verbose,
                max_parallel: max_parallel.unwrap_or(config.run.max_parallel),
                cancel,
                print: !json,
            };
            let reports = run_scenarios(scenarios, Arc::new(ShellRunner::new()), &settings).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                print_summary(&reports);
            }

            Ok(reports
                .iter()
                .all(|r| r.passed() || r.verdict.is_skipped()))
        }

        Commands::Check { files } => Ok(check(&files, config)),

        Commands::Namespace { label, count } => {
            for _ in 0..count {
                println!("{}", naming::generate(&label));
            }
            Ok(true)
        }
    }
}

/// What to do about an interrupt signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    /// Stop the in-flight step and run cleanup
    Cancel,
    /// Give up on cleanup and exit now
    Exit,
}

/// Counts interrupts received during a run
#[derive(Debug, Default)]
struct Interrupts {
    received: u32,
}

impl Interrupts {
    fn on_signal(&mut self) -> Interrupt {
        self.received += 1;
        if self.received == 1 {
            Interrupt::Cancel
        } else {
            Interrupt::Exit
        }
    }
}

/// Cancel the run on the first Ctrl-C so cleanup still runs; exit on the second
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut interrupts = Interrupts::default();
        while tokio::signal::ctrl_c().await.is_ok() {
            match interrupts.on_signal() {
                Interrupt::Cancel => {
                    eprintln!(
                        "\n{} interrupted, running cleanup steps (Ctrl-C again to exit now)",
                        "!".yellow().bold()
                    );
                    cancel.cancel();
                }
                Interrupt::Exit => {
                    eprintln!("\n{} interrupted again, exiting without cleanup", "!".red().bold());
                    std::process::exit(130);
                }
            }
        }
    });
}

fn check(files: &[PathBuf], config: &Config) -> bool {
    let mut ok = true;
    for path in files {
        match PreparedScenario::load(path, config, None) {
            Ok(scenario) => {
                let cleanup = scenario.steps.iter().filter(|s| s.is_cleanup()).count();
                println!(
                    "{} {} ({} main, {} cleanup{})",
                    "✓".green(),
                    scenario.name.white().bold(),
                    scenario.steps.len() - cleanup,
                    cleanup,
                    if scenario.parallel { ", parallel" } else { "" }
                );
                if let Some(desc) = &scenario.description {
                    println!("  {}", desc.dimmed());
                }
            }
            Err(e) => {
                ok = false;
                println!("{} {}: {}", "✗".red(), path.display(), e);
            }
        }
    }
    ok
}

fn print_summary(reports: &[SequenceReport]) {
    let count = |f: fn(&Verdict) -> bool| reports.iter().filter(|r| f(&r.verdict)).count();
    let passed = count(Verdict::is_passed);
    let skipped = count(Verdict::is_skipped);
    let failed = reports.len() - passed - skipped;

    println!();
    println!(
        "{} {}, {} {}, {} {}",
        passed,
        "passed".green(),
        failed,
        if failed > 0 { "failed".red() } else { "failed".normal() },
        skipped,
        "skipped".yellow()
    );
    for report in reports.iter().filter(|r| !r.passed() && !r.verdict.is_skipped()) {
        println!("  {} {}: {}", "✗".red(), report.name, report.verdict);
    }
}
