//! Handler for the `clean` command.

use dialoguer::theme::ColorfulTheme;
use dialoguer::Confirm;

use crate::cli::{build_manager, output, CleanArgs};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::manager::StopOutcome;
use crate::spec::ServiceCatalog;

/// Execute the clean command.
pub async fn execute(settings: &Settings, catalog: &ServiceCatalog, args: &CleanArgs) -> Result<()> {
    let specs = catalog.resolve(&args.services)?;

    if !args.yes && !settings.orchestration.auto_confirm {
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        let prompt = if args.volumes {
            format!(
                "Remove containers AND data volumes for {}? Volume data cannot be recovered",
                names.join(", ")
            )
        } else {
            format!("Remove containers and groups for {}?", names.join(", "))
        };
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(false)
            .interact()?;
        if !confirmed {
            output::note("Aborted.");
            return Ok(());
        }
    }

    let manager = build_manager(settings)?;
    manager.ensure_runtime().await?;

    let report = manager.clean(&specs, args.volumes).await?;

    let mut failed = 0;
    for service in &report.services {
        match &service.outcome {
            StopOutcome::Stopped { .. } => {
                output::ok(&format!("{}: removed", service.service));
            }
            StopOutcome::NotRunning => {
                output::note(&format!("{}: nothing to remove", service.service));
            }
            StopOutcome::Failed(error) => {
                failed += 1;
                output::error(&format!("{}: {error}", service.service));
            }
        }
    }
    for volume in &report.removed_volumes {
        output::ok(&format!("volume {volume}: deleted"));
    }

    if failed > 0 {
        Err(Error::ServicesFailed { failed })
    } else {
        Ok(())
    }
}
