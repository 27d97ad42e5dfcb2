use crate::authority::password::hash_password;
use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};

#[derive(Debug)]
pub struct Args {
    pub password: SecretString,
}

/// Print the PHC string so it can be pasted into a directory seed file.
/// # Errors
/// Returns an error if hashing fails.
pub fn execute(args: &Args) -> Result<()> {
    let hash = hash_password(args.password.expose_secret())?;
    println!("{hash}");
    Ok(())
}
