//! netmesh - iperf3 mesh tests across cluster nodes
//!
//! ## Usage
//!
//! ```bash
//! # full mesh over every node in an inventory, report saved as JSON
//! netmesh run --inventory cluster.json --output mesh.json
//!
//! # only nodes running a given job, 4 parallel clients per link
//! netmesh run --job default:job-name=train --pclients 4
//!
//! # print the schedule, or clean up after an aborted run
//! netmesh plan --inventory cluster.json --nodes gpu-1,gpu-2,gpu-3
//! netmesh stop --inventory cluster.json
//! ```
//!
//! Exit status is 0 when the schedule completed (whatever individual links did), 1 on
//! configuration or discovery errors and 130 when interrupted.

use clap::Parser;
use log::{error, info, warn};
use netmesh::MeshError;
use netmesh_cli::{
    cli::{Cli, Command},
    commands, exit_code, init_logging,
};
use tokio::sync::watch;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.effective_log_level()) {
        eprintln!("{e:#}");
        std::process::exit(1);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current round and stopping servers");
            let _ = shutdown_tx.send(true);
        }
    });

    let result = match cli.command {
        Command::Run(args) => commands::run(&args, shutdown_rx).await.map(|_| ()),
        Command::Plan(args) => commands::plan(&args).await,
        Command::Stop(args) => commands::stop(&args).await,
    };

    if let Err(ref e) = result {
        error!("{e:#}");

        match e.downcast_ref::<MeshError>() {
            Some(MeshError::Directory(_)) => {
                error!("Please check the node selection and that the directory is reachable");
            }
            Some(MeshError::Config { .. }) => {
                error!("Please check the command-line options");
            }
            _ => {}
        }
    } else {
        info!("Done");
    }

    std::process::exit(exit_code(&result));
}
