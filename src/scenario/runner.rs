//! Scenario runner
//!
//! Sequential scenarios run one at a time and print as they go. Parallel
//! ones run concurrently afterwards, bounded by `max_parallel`, with their
//! output buffered so each test case prints as one block.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::PreparedScenario;
use crate::orchestrator::Orchestrator;
use crate::process::ProcessRunner;
use crate::report::{Reporter, SequenceReport, TextReporter, Verdict};

/// How a batch of scenarios is run
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub verbose: bool,
    pub max_parallel: usize,
    pub cancel: CancellationToken,
    /// Print buffered output of parallel scenarios to stdout
    pub print: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            verbose: false,
            max_parallel: 4,
            cancel: CancellationToken::new(),
            print: true,
        }
    }
}

/// Run every scenario, returning reports in the order given
pub async fn run_scenarios(
    scenarios: Vec<PreparedScenario>,
    runner: Arc<dyn ProcessRunner>,
    settings: &RunSettings,
) -> Vec<SequenceReport> {
    let names: Vec<String> = scenarios.iter().map(|s| s.name.clone()).collect();
    let mut slots: Vec<Option<SequenceReport>> = names.iter().map(|_| None).collect();

    let (parallel, sequential): (Vec<_>, Vec<_>) = scenarios
        .into_iter()
        .enumerate()
        .partition(|(_, s)| s.parallel);

    for (index, scenario) in sequential {
        let mut reporter = if settings.print {
            TextReporter::stdout(settings.verbose)
        } else {
            TextReporter::buffered(settings.verbose)
        };
        let report = run_one(scenario, Arc::clone(&runner), settings.cancel.clone(), &mut reporter).await;
        slots[index] = Some(report);
    }

    if !parallel.is_empty() {
        tracing::info!(
            count = parallel.len(),
            max_parallel = settings.max_parallel,
            "running parallel scenarios"
        );
        let semaphore = Arc::new(Semaphore::new(settings.max_parallel.max(1)));
        let mut tasks = JoinSet::new();

        for (index, scenario) in parallel {
            let semaphore = Arc::clone(&semaphore);
            let runner = Arc::clone(&runner);
            let cancel = settings.cancel.clone();
            let verbose = settings.verbose;
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let mut reporter = TextReporter::buffered(verbose);
                let report = run_one(scenario, runner, cancel, &mut reporter).await;
                (index, report, reporter.into_lines())
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, report, lines)) => {
                    if settings.print {
                        for line in lines {
                            println!("{}", line);
                        }
                    }
                    slots[index] = Some(report);
                }
                Err(e) => tracing::error!("scenario task failed: {}", e),
            }
        }
    }

    slots
        .into_iter()
        .zip(names)
        .map(|(slot, name)| {
            slot.unwrap_or_else(|| errored(&name, "scenario task did not complete".to_string()))
        })
        .collect()
}

async fn run_one(
    scenario: PreparedScenario,
    runner: Arc<dyn ProcessRunner>,
    cancel: CancellationToken,
    reporter: &mut dyn Reporter,
) -> SequenceReport {
    let options = scenario.run_options(cancel);
    let orchestrator = Orchestrator::with_runner(runner, scenario.context.clone());
    tracing::debug!(scenario = %scenario.name, path = %scenario.path.display(), "running scenario");

    match orchestrator
        .run(&scenario.name, &scenario.steps, options, reporter)
        .await
    {
        Ok(report) => report,
        Err(e) => {
            let report = errored(&scenario.name, e.to_string());
            reporter.finish(&report);
            report
        }
    }
}

fn errored(name: &str, message: String) -> SequenceReport {
    SequenceReport {
        name: name.to_string(),
        verdict: Verdict::Errored {
            step: name.to_string(),
            message,
        },
        namespaces: Vec::new(),
        main: Vec::new(),
        cleanup: Vec::new(),
        diagnostics: Vec::new(),
        warnings: Vec::new(),
        elapsed: Duration::ZERO,
    }
}
