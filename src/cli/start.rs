//! Handler for the `start` command.

use crate::cli::{build_manager, output, StartArgs};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::manager::{ServiceResult, StartOptions};
use crate::spec::ServiceCatalog;

/// Execute the start command.
pub async fn execute(settings: &Settings, catalog: &ServiceCatalog, args: &StartArgs) -> Result<()> {
    // Resolve names first so typos fail before any engine call.
    let specs = catalog.resolve(&args.services)?;

    let manager = build_manager(settings)?;
    manager.ensure_runtime().await?;

    output::section(&format!(
        "Starting {} service(s) via {}",
        specs.len(),
        manager.runtime().name()
    ));

    let options = StartOptions {
        force_cpu: args.cpu,
        refresh_images: args.refresh,
    };
    let report = manager.start(&specs, &options).await?;

    println!();
    for service in &report.services {
        match &service.result {
            ServiceResult::Ready => {
                output::ok(&format!("{}: running (no health check)", service.service));
            }
            ServiceResult::Healthy(status) => {
                output::ok(&format!("{}: healthy ({status})", service.service));
            }
            ServiceResult::TimedOut => {
                output::warn(&format!(
                    "{}: started but not healthy before the deadline",
                    service.service
                ));
            }
            ServiceResult::Pending => {
                output::warn(&format!("{}: still waiting", service.service));
            }
            ServiceResult::Failed { step, error } => {
                output::error(&format!("{}: {step} failed: {error}", service.service));
            }
        }
        for note in &service.notes {
            output::note(&format!("    {note}"));
        }
    }

    if report.has_failures() {
        Err(Error::ServicesFailed {
            failed: report.failed_count(),
        })
    } else {
        Ok(())
    }
}
