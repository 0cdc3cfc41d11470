use std::io::Read;

use anyhow::Context;
use mg_domain::config::Config;
use mg_providers::Vault;

/// Read a plaintext credential from stdin and print its ciphertext.
///
/// Trailing newlines are stripped so `echo $KEY | modelgate vault encrypt`
/// encrypts exactly the key.
pub fn encrypt_stdin(config: &Config) -> anyhow::Result<()> {
    let mut plaintext = String::new();
    std::io::stdin()
        .read_to_string(&mut plaintext)
        .context("reading plaintext from stdin")?;
    println!("{}", encrypt_input(config, &plaintext)?);
    Ok(())
}

fn encrypt_input(config: &Config, input: &str) -> anyhow::Result<String> {
    let plaintext = input.trim_end_matches(['\r', '\n']);
    if plaintext.is_empty() {
        anyhow::bail!("no plaintext on stdin");
    }
    let vault = Vault::from_env(&config.vault.secret_env);
    vault
        .encrypt(plaintext)
        .with_context(|| format!("encrypting with the secret in {}", config.vault.secret_env))
}
