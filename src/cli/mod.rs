//! Command-line interface.
//!
//! Without a subcommand (or with `serve`) the binary starts the HTTP server.
//! The remaining subcommands work directly against the configured store:
//! - `create-user` - Add a staff account
//! - `disable-user` - Block a staff account from signing in
//! - `seed` - Insert demo patients and exams
//! - `check-config` - Validate the configuration file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::api::auth::register_user;
use crate::config::Config;
use crate::db::{self, CreateUserRequest, User};

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "labtrack")]
#[command(author, version, about = "Clinical laboratory exam tracking server", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "labtrack.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Create a staff account
    CreateUser {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Account password (can also be set via LABTRACK_USER_PASSWORD)
        #[arg(long, env = "LABTRACK_USER_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Disable a staff account
    DisableUser {
        #[arg(long)]
        email: String,
    },

    /// Insert demo patients and exams into an empty store
    Seed,

    /// Validate the configuration file and exit
    CheckConfig,
}

impl Cli {
    /// True when the invocation should start the server
    pub fn is_serve(&self) -> bool {
        matches!(self.command, None | Some(Commands::Serve))
    }
}

/// Run a non-server subcommand
pub async fn run_command(cli: &Cli, config: &Config) -> Result<()> {
    match &cli.command {
        Some(Commands::CreateUser {
            name,
            email,
            password,
        }) => cmd_create_user(config, name, email, password).await,
        Some(Commands::DisableUser { email }) => cmd_disable_user(config, email).await,
        Some(Commands::Seed) => cmd_seed(config).await,
        Some(Commands::CheckConfig) => cmd_check_config(cli, config),
        // Serving is handled in main.rs
        Some(Commands::Serve) | None => Ok(()),
    }
}

async fn cmd_create_user(config: &Config, name: &str, email: &str, password: &str) -> Result<()> {
    let pool = db::init(&config.database).await?;
    let req = CreateUserRequest {
        name: name.to_string(),
        email: email.to_string(),
        password: password.to_string(),
    };
    let user = register_user(&pool, &req)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    println!("Created staff user {} <{}> ({})", user.name, user.email, user.id);
    Ok(())
}

async fn cmd_disable_user(config: &Config, email: &str) -> Result<()> {
    let pool = db::init(&config.database).await?;
    let email = email.trim().to_lowercase();
    let user = User::find_by_email(&pool, &email)
        .await?
        .with_context(|| format!("No staff user with email {}", email))?;

    User::set_active(&pool, &user.id, false).await?;
    println!("Disabled staff user {}", user.email);
    Ok(())
}

async fn cmd_seed(config: &Config) -> Result<()> {
    let pool = db::init(&config.database).await?;
    let created = db::seed_demo_data(&pool).await?;
    if created == 0 {
        println!("Store already has patients; nothing seeded.");
    } else {
        println!("Seeded {} demo exams.", created);
    }
    Ok(())
}

fn cmd_check_config(cli: &Cli, config: &Config) -> Result<()> {
    println!("Checking configuration file: {}", cli.config.display());
    if !cli.config.exists() {
        println!("[!!] Configuration file not found, defaults and environment apply");
    }

    match config.validate() {
        Ok(()) => {
            println!("[OK] Configuration is valid");
            println!("     listen:   {}", config.server.bind_addr());
            println!("     database: {}", config.database.url);
            println!(
                "     cookies:  {} / {} (secure: {})",
                config.auth.staff_cookie, config.auth.patient_cookie, config.auth.secure_cookies
            );
            Ok(())
        }
        Err(e) => {
            println!("[!!] {}", e);
            Err(e)
        }
    }
}
