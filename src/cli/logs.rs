//! Handler for the `logs` command.

use crate::cli::{build_manager, LogsArgs};
use crate::config::Settings;
use crate::error::Result;
use crate::runtime::LogOptions;
use crate::spec::ServiceCatalog;

/// Execute the logs command.
pub async fn execute(settings: &Settings, catalog: &ServiceCatalog, args: &LogsArgs) -> Result<()> {
    let specs = catalog.resolve(std::slice::from_ref(&args.service))?;
    let spec = specs[0];

    let manager = build_manager(settings)?;
    manager.ensure_runtime().await?;

    let options = LogOptions {
        follow: args.follow,
        tail: Some(args.lines),
        since: args.since.clone(),
    };
    let mut stream = manager.logs(spec, &options).await?;
    while let Some(line) = stream.next_line().await? {
        println!("{line}");
    }
    Ok(())
}
