//! `signctrl version`.

use color_eyre::eyre::Result;

pub fn run() -> Result<()> {
    println!("signctrl v{}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
