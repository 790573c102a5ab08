//! Handler for the `status` command.

use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::cli::{build_manager, output, StatusArgs};
use crate::config::Settings;
use crate::error::Result;
use crate::manager::HealthSummary;
use crate::spec::ServiceCatalog;

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Ports")]
    ports: String,
    #[tabled(rename = "Health")]
    health: String,
}

/// Execute the status command.
pub async fn execute(
    settings: &Settings,
    catalog: &ServiceCatalog,
    args: &StatusArgs,
) -> Result<()> {
    let specs = catalog.resolve(&args.services)?;

    let manager = build_manager(settings)?;
    manager.ensure_runtime().await?;

    let states = manager.status(&specs).await?;

    let rows: Vec<StatusRow> = states
        .iter()
        .map(|state| StatusRow {
            service: state.service.clone(),
            state: if state.running {
                "● running".to_string()
            } else if state.present {
                "○ stopped".to_string()
            } else {
                "- absent".to_string()
            },
            ports: if state.ports.is_empty() {
                "-".to_string()
            } else {
                state.ports.join(", ")
            },
            health: match &state.health {
                HealthSummary::NotConfigured => "-".to_string(),
                HealthSummary::NotRunning => "not running".to_string(),
                HealthSummary::Healthy(status) => format!("healthy ({status})"),
                HealthSummary::Unhealthy(detail) => format!("unhealthy: {detail}"),
            },
        })
        .collect();

    output::section(&format!("podstack v{}", env!("CARGO_PKG_VERSION")));
    output::key_value("Engine", manager.runtime().name());
    println!("{}", Table::new(rows).with(Style::sharp()));
    Ok(())
}
