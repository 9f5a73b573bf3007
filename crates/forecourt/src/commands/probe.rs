//! `forecourt probe`: handshake with every configured device.

use std::io::{self, IsTerminal};

use futures_util::future::join_all;
use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};
use tracing::warn;

use forecourt_link::{DeviceEndpoint, Registry};

use crate::cli::GlobalOpts;
use crate::error::CliError;

#[derive(Tabled)]
struct ProbeRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Device ID")]
    device_id: String,
    #[tabled(rename = "Result")]
    result: String,
}

fn row(endpoint: &DeviceEndpoint, outcome: Result<String, String>, color: bool) -> ProbeRow {
    let result = match (outcome, color) {
        (Ok(version), true) => format!("{} ({version})", "ok".green()),
        (Ok(version), false) => format!("ok ({version})"),
        (Err(e), true) => e.red().to_string(),
        (Err(e), false) => e,
    };
    ProbeRow {
        name: endpoint.name.clone(),
        kind: endpoint.kind.to_string(),
        address: endpoint.address(),
        device_id: endpoint.device_id.clone(),
        result,
    }
}

async fn probe_one(registry: &Registry, endpoint: &DeviceEndpoint) -> Result<String, String> {
    registry
        .link(&endpoint.name)
        .await
        .map(|link| link.protocol_version().to_owned())
        .map_err(|e| e.to_string())
}

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let config = super::load(global)?;
    let registry = config.registry();
    let endpoints = registry.endpoints();

    let outcomes = join_all(endpoints.iter().map(|ep| probe_one(&registry, ep))).await;
    if let Err(e) = registry.close_all().await {
        warn!(error = %e, "failed to close probe links");
    }

    let color = io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    let failed = outcomes.iter().filter(|o| o.is_err()).count();
    let rows: Vec<ProbeRow> = endpoints
        .iter()
        .zip(outcomes)
        .map(|(ep, outcome)| row(ep, outcome, color))
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));

    if failed > 0 {
        return Err(CliError::ProbeFailed {
            failed,
            total: endpoints.len(),
        });
    }
    Ok(())
}
