//! Handler for the `stop` command.

use dialoguer::theme::ColorfulTheme;
use dialoguer::Confirm;

use crate::cli::{build_manager, output, StopArgs};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::manager::StopOutcome;
use crate::spec::ServiceCatalog;

/// Execute the stop command.
pub async fn execute(settings: &Settings, catalog: &ServiceCatalog, args: &StopArgs) -> Result<()> {
    let specs = catalog.resolve(&args.services)?;

    if args.rm && !args.yes && !settings.orchestration.auto_confirm {
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "Remove containers and groups for {}?",
                names.join(", ")
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            output::note("Aborted.");
            return Ok(());
        }
    }

    let manager = build_manager(settings)?;
    manager.ensure_runtime().await?;

    let reports = manager.stop(&specs, args.rm).await;

    let mut failed = 0;
    for report in &reports {
        match &report.outcome {
            StopOutcome::Stopped { removed: true } => {
                output::ok(&format!("{}: stopped and removed", report.service));
            }
            StopOutcome::Stopped { removed: false } => {
                output::ok(&format!("{}: stopped", report.service));
            }
            StopOutcome::NotRunning => {
                output::note(&format!("{}: not running", report.service));
            }
            StopOutcome::Failed(error) => {
                failed += 1;
                output::error(&format!("{}: {error}", report.service));
            }
        }
    }

    if failed > 0 {
        Err(Error::ServicesFailed { failed })
    } else {
        Ok(())
    }
}
