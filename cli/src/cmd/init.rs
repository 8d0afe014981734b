//! `signctrl init`: creates the configuration directory, the config.toml
//! template, the connection key and the signing backend files. Existing
//! files are never overwritten.

use std::fs;
use std::path::Path;

use color_eyre::eyre::{Result, WrapErr};
use signctrl_config::template;
use signctrl_connection::generate_conn_key;
use signctrl_privval::FilePv;

pub fn run(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        fs::create_dir_all(config_dir)
            .wrap_err_with(|| format!("couldn't create {}", config_dir.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(config_dir, fs::Permissions::from_mode(0o700))?;
        }

        println!("Created configuration directory at {}", config_dir.display());
    }

    if template::write_template(config_dir)? {
        println!("Created config.toml (fill in chain_id and the validator addresses)");
    } else {
        println!("config.toml already exists, leaving it untouched");
    }

    if generate_conn_key(config_dir)? {
        println!("Created conn.key");
    } else {
        println!("conn.key already exists, leaving it untouched");
    }

    FilePv::load_or_generate(config_dir).wrap_err("couldn't set up the signing backend")?;
    println!("Signing backend ready");

    Ok(())
}
