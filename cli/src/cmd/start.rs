//! `signctrl start`: loads the configuration, starts the service and waits
//! for either an OS stop signal or a self-induced shutdown.

use std::path::PathBuf;

use color_eyre::eyre::{eyre, Result};
use signctrl_privval::{Outcome, SignCtrl, DEFAULT_HTTP_PORT};
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

pub async fn run(config_dir: PathBuf) -> Result<()> {
    let config = signctrl_config::load_config(&config_dir)?;
    crate::logging::init(config.base.log_level);

    let handle = SignCtrl {
        config,
        config_dir,
        http_port: DEFAULT_HTTP_PORT,
    }
    .start()
    .await?;

    let cancel = handle.cancel_token();
    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("no signal handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        info!("Received stop signal");
        cancel.cancel();
    });

    match handle.join().await? {
        Outcome::ExternalStop => Ok(()),
        // Nonzero exit makes the self-shutdown observable to supervisors.
        Outcome::Fatal(fatal) => Err(eyre!("SignCTRL terminated itself: {fatal}")),
    }
}
