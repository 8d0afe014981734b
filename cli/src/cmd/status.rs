//! `signctrl status`: queries the running signer's local status endpoint.

use color_eyre::eyre::{Result, WrapErr};
use signctrl_privval::{get_status, DEFAULT_HTTP_PORT};

pub async fn run() -> Result<()> {
    let status = get_status(DEFAULT_HTTP_PORT)
        .await
        .wrap_err("couldn't get status (is SignCTRL running?)")?;

    println!(
        "Status of the SignCTRL validator:
  Height:  {}
  Rank:    {}/{}
  Counter: {}/{}",
        status.height, status.rank, status.set_size, status.counter, status.threshold,
    );

    Ok(())
}
