use anyhow::anyhow;
use rand::RngCore;
use secrecy::SecretString;
use std::{
    fs::{metadata, File},
    io::{Read, Write},
};

/// Load a hex-encoded secret from `file_path`, generating and persisting a
/// fresh random one of `len_bytes` if the file doesn't exist yet. Used for
/// both the purchase token HMAC key and the IP-hash salt: neither needs the
/// asymmetric key machinery the rest of this module's sibling once carried,
/// just a stable random value the process can find again after a restart.
pub fn get_or_create_secret(file_path: &str, len_bytes: usize) -> Result<SecretString, anyhow::Error> {
    if metadata(file_path).is_ok() {
        read_secret(file_path)
    } else {
        let secret = generate_secret(len_bytes);
        save_secret(file_path, &secret)?;
        Ok(SecretString::from(secret))
    }
}

fn generate_secret(len_bytes: usize) -> String {
    let mut bytes = vec![0u8; len_bytes];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn read_secret(file_path: &str) -> Result<SecretString, anyhow::Error> {
    let mut file = File::open(file_path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(SecretString::from(contents.trim().to_string()))
}

fn save_secret(file_path: &str, secret: &str) -> Result<(), anyhow::Error> {
    if let Some(parent) = std::path::Path::new(file_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(file_path)
        .map_err(|e| anyhow!("failed to create secret file {file_path}: {e}"))?;
    file.write_all(secret.as_bytes())?;
    Ok(())
}
