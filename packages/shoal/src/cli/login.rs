//! `shoal login|logout|register|whoami` — session management.

use anyhow::{Context, Result};
use clap::Args;

use crate::config::{FileConfig, ShoalConfig};

#[derive(Args)]
pub struct LoginArgs {
    /// Username (prompted for when omitted)
    #[arg(long)]
    pub username: Option<String>,
}

#[derive(Args)]
pub struct RegisterArgs {
    /// Username (prompted for when omitted)
    #[arg(long)]
    pub username: Option<String>,

    /// Email address attached to the new account
    #[arg(long)]
    pub email: Option<String>,
}

pub async fn login(config: &ShoalConfig, file: &FileConfig, args: LoginArgs) -> Result<()> {
    let (_, store) = super::open_session(config, file)?;
    let username = match args.username {
        Some(username) => username,
        None => prompt("Username: ")?,
    };
    let password = read_password()?;
    let user = store.login(&username, &password).await?;
    eprintln!("Logged in as {}.", user.username);
    Ok(())
}

pub async fn logout(config: &ShoalConfig, file: &FileConfig) -> Result<()> {
    let (_, store) = super::open_session(config, file)?;
    store.logout();
    eprintln!("Logged out.");
    Ok(())
}

pub async fn register(config: &ShoalConfig, file: &FileConfig, args: RegisterArgs) -> Result<()> {
    let (api, store) = super::open_session(config, file)?;
    let username = match args.username {
        Some(username) => username,
        None => prompt("Username: ")?,
    };
    let password = read_password()?;
    let registration = api
        .register(&username, &password, args.email.as_deref())
        .await?;
    let username = registration.user.username.clone();
    store.adopt(registration.access, registration.refresh, registration.user)?;
    eprintln!("Account {username} created — you are logged in.");
    Ok(())
}

pub async fn whoami(config: &ShoalConfig, file: &FileConfig) -> Result<()> {
    let (_, store) = super::open_session(config, file)?;
    let user = super::require_user(&store).await?;
    match user.email {
        Some(email) => println!("{} (id {}) <{}>", user.username, user.id, email),
        None => println!("{} (id {})", user.username, user.id),
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    use std::io::Write;
    eprint!("{label}");
    std::io::stderr().flush()?;
    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .context("reading input")?;
    let input = input.trim().to_string();
    if input.is_empty() {
        anyhow::bail!("nothing entered");
    }
    Ok(input)
}

fn read_password() -> Result<String> {
    use std::io::Write;
    eprint!("Password: ");
    std::io::stderr().flush()?;
    rpassword::read_password().context("reading password")
}
