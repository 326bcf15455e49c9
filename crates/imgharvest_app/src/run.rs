use std::io::{self, Write};
use std::thread;

use anyhow::{bail, Context, Result};
use engine_logging::{engine_debug, engine_info, engine_warn};
use imgharvest_core::{RunReport, ScrapeRequest, ScrapeResult};
use imgharvest_engine::{Canceller, EngineConfig, EngineEvent, EngineHandle, Stage};

/// How the process should exit once the run is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed,
    /// Some source failed or the run was cut short.
    Incomplete,
}

/// Runs `request` on a background engine, rendering events as they arrive.
pub(crate) fn execute(config: EngineConfig, request: ScrapeRequest) -> Result<Outcome> {
    let request = request.validated().context("invalid request")?;
    engine_info!(
        "Harvesting {:?} from {} source(s) into {}",
        request.query,
        request.sources.len(),
        request.options.output_dir.display()
    );

    let engine = EngineHandle::new(config);
    engine.start(request);
    cancel_on_interrupt(engine.canceller());

    let stdout = io::stdout();
    let mut out = stdout.lock();
    while let Some(event) = engine.recv() {
        if let EngineEvent::RunFinished(report) = event {
            render_report(&mut out, &report)?;
            return Ok(outcome_of(&report));
        }
        render_event(&mut out, &event)?;
    }
    bail!("engine stopped before finishing the run")
}

/// Ctrl-C stops the run at the next item boundary; the report still prints.
fn cancel_on_interrupt(canceller: Canceller) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                engine_warn!("Ctrl-C handling unavailable: {}", err);
                return;
            }
        };
        runtime.block_on(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    engine_warn!("Interrupted; stopping after the current item");
                    canceller.cancel();
                }
                Err(err) => engine_warn!("Could not listen for Ctrl-C: {}", err),
            }
        });
    });
}

fn render_event(out: &mut impl Write, event: &EngineEvent) -> io::Result<()> {
    match event {
        EngineEvent::SourceStarted {
            engine,
            destination,
        } => writeln!(out, "{engine}: saving to {}", destination.display()),
        EngineEvent::Progress(progress) => {
            if progress.stage == Stage::Downloading {
                engine_debug!(
                    "{}: saved={} skipped={}",
                    progress.engine,
                    progress.saved,
                    progress.skipped
                );
            }
            Ok(())
        }
        EngineEvent::SourceFinished(result) => render_result(out, result),
        EngineEvent::RunFinished(_) => Ok(()),
    }
}

fn render_result(out: &mut impl Write, result: &ScrapeResult) -> io::Result<()> {
    writeln!(out, "{}", result.summary_line())?;
    if !result.errors.is_empty() {
        writeln!(out, "{}: {} error(s)", result.engine, result.errors.len())?;
        for line in &result.errors {
            writeln!(out, "  {line}")?;
        }
    }
    Ok(())
}

fn render_report(out: &mut impl Write, report: &RunReport) -> io::Result<()> {
    for failure in &report.failures {
        writeln!(out, "{failure}")?;
    }
    if report.cancelled {
        writeln!(out, "run cancelled")?;
    } else if report.aborted {
        writeln!(out, "run aborted")?;
    }
    let saved: usize = report.results.iter().map(|r| r.saved).sum();
    let errors: usize = report.results.iter().map(|r| r.errors.len()).sum();
    writeln!(
        out,
        "done: {} source(s), {saved} saved, {errors} error(s), {} failed",
        report.results.len(),
        report.failures.len()
    )
}

fn outcome_of(report: &RunReport) -> Outcome {
    if report.aborted || report.cancelled || !report.failures.is_empty() {
        Outcome::Incomplete
    } else {
        Outcome::Completed
    }
}
