//! tcpmap - TCP port election controller for TCPIngressMapping resources

use clap::Parser;
use kube::{Client, CustomResourceExt};

use tcpmap_common::crd::TCPIngressMapping;
use tcpmap_common::telemetry::init_logging;
use tcpmap_operator::config::Cli;
use tcpmap_operator::controller_runner::build_mapping_controller;
use tcpmap_operator::startup::{ensure_crds_installed, load_mapping_index};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&TCPIngressMapping::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_logging(cli.operator.log_format.into())?;

    let config = cli.operator.mapping_config()?;
    let scope = cli.operator.watch_scope()?;
    tracing::info!(
        ports = %config.ports,
        frontend = ?config.default_frontend.as_ref().map(ToString::to_string),
        config_store = ?config.default_config_store.as_ref().map(ToString::to_string),
        "starting tcpmap controller"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if cli.operator.install_crds {
        ensure_crds_installed(&client).await?;
    }

    let index = load_mapping_index(&client, &scope).await?;
    build_mapping_controller(client, config, &scope, index, cli.operator.concurrent).await;

    tracing::info!("controller stopped");
    Ok(())
}
