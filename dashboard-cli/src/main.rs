//! dashctl - command-line client for the dashboard.
//!
//! Keeps one session per user: the access token survives between runs and is
//! checked against the API on every start.
//!
//! ```
//! dashctl login --email admin@example.com
//! dashctl whoami
//! dashctl nav --path /admin/categories
//! dashctl logout
//! ```

mod config;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dashboard_session::navigation::{expanded_group, visible_items};
use dashboard_session::{
    DashboardApi, FileTokenStore, GuardDecision, LoginOutcome, RestrictedToken, RouteGuard,
    SessionStatus, SessionStore, validate_new_password,
};
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;

/// Dashboard session client
#[derive(Parser, Debug)]
#[command(name = "dashctl", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (default: platform-specific config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at info level on the console
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in; prompts for anything not given
    Login {
        #[arg(long)]
        email: Option<String>,

        /// Prefer the prompt; arguments end up in shell history
        #[arg(long)]
        password: Option<String>,
    },
    /// End the session
    Logout,
    /// Show the session status
    Status,
    /// Show the logged-in user as reported by the API
    Whoami,
    /// List the dashboard sections available to the logged-in user
    Nav {
        /// Current location, used to expand the matching group
        #[arg(long, default_value = "/admin")]
        path: String,
    },
    /// Log in and complete a password change the server requires
    ChangePassword {
        #[arg(long)]
        email: Option<String>,
    },
    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    if let Command::InitConfig { force } = cli.command {
        return init_config(&config_path, force);
    }

    let config = Config::load(&config_path)?;
    init_logging(&config.storage.log_dir(), cli.verbose)?;
    let api = DashboardApi::new(
        config.api.url.as_str(),
        config.api.allow_invalid_tls,
        config.api.timeout(),
    )
    .with_context(|| format!("Invalid API url: {}", config.api.url))?;
    let storage = FileTokenStore::new(config.storage.token_dir.clone());
    let store = SessionStore::new(Arc::new(api), storage);
    let mut guard = RouteGuard::new(store.subscribe());

    store.restore().await;

    match cli.command {
        Command::Login { email, password } => login(&store, email, password).await,
        Command::Logout => {
            store.logout().await;
            println!("Logged out");
            Ok(())
        }
        Command::Status => {
            print_status(&store);
            Ok(())
        }
        Command::Whoami => {
            require_session(&mut guard).await?;
            whoami(&store).await
        }
        Command::Nav { path } => {
            require_session(&mut guard).await?;
            print_nav(&store, &path);
            Ok(())
        }
        Command::ChangePassword { email } => {
            let email = match email {
                Some(email) => email,
                None => prompt_line("Email: ")?,
            };
            let current = rpassword::prompt_password("Current password: ")?;
            match store.login(&email, &current).await? {
                LoginOutcome::PasswordChangeRequired(token) => {
                    complete_password_change(&store, &email, &current, &token).await
                }
                LoginOutcome::Authenticated(user) => {
                    println!(
                        "No password change is required for {}. You are logged in.",
                        user.email
                    );
                    Ok(())
                }
            }
        }
        Command::InitConfig { force } => init_config(&config_path, force),
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save(path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

async fn login(store: &SessionStore, email: Option<String>, password: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => prompt_line("Email: ")?,
    };
    let password = match password {
        Some(password) => password,
        None => rpassword::prompt_password("Password: ")?,
    };

    match store.login(&email, &password).await? {
        LoginOutcome::Authenticated(user) => {
            println!("Logged in as {}", user.email);
            Ok(())
        }
        LoginOutcome::PasswordChangeRequired(token) => {
            complete_password_change(store, &email, &password, &token).await
        }
    }
}

/// Change the password with the restricted token, then log in with the new one.
async fn complete_password_change(
    store: &SessionStore,
    email: &str,
    old_password: &str,
    token: &RestrictedToken,
) -> Result<()> {
    println!("You must change your password before continuing.");

    let new_password = loop {
        let new_password = rpassword::prompt_password("New password: ")?;
        let confirmation = rpassword::prompt_password("Confirm new password: ")?;
        match validate_new_password(&new_password, &confirmation) {
            Ok(()) => break new_password,
            Err(e) => eprintln!("{e}"),
        }
    };

    if !store.change_password(token, old_password, &new_password).await {
        bail!("Password change failed. Check your current password and try again.");
    }
    info!("Password changed for {}, logging in again", email);

    match store.login(email, &new_password).await? {
        LoginOutcome::Authenticated(user) => {
            println!("Password changed. Logged in as {}", user.email);
            Ok(())
        }
        LoginOutcome::PasswordChangeRequired(_) => {
            bail!("The server still requires a password change for {email}")
        }
    }
}

/// Gate a protected command on the route guard.
async fn require_session(guard: &mut RouteGuard) -> Result<()> {
    match guard.resolve().await {
        GuardDecision::Render => Ok(()),
        GuardDecision::Placeholder => bail!("Session restore did not finish"),
        GuardDecision::Redirect { to, .. } => {
            bail!("Not logged in. Run `dashctl login` first ({to})")
        }
    }
}

fn print_status(store: &SessionStore) {
    let session = store.snapshot();
    match (session.status, session.user) {
        (SessionStatus::Authenticated, Some(user)) => {
            let role = if user.is_admin { "admin" } else { "user" };
            println!("Logged in as {} ({role})", user.email);
        }
        (SessionStatus::PasswordChangeRequired, _) => println!("Password change required"),
        _ => println!("Not logged in"),
    }
}

async fn whoami(store: &SessionStore) -> Result<()> {
    let user = store
        .refresh_identity()
        .await
        .context("Failed to fetch the current user")?;

    println!("email:    {}", user.email);
    if let Some(id) = user.id {
        println!("id:       {id}");
    }
    println!("admin:    {}", user.is_admin);
    println!("active:   {}", user.is_active);
    for (key, value) in &user.extra {
        println!("{key}: {value}");
    }
    Ok(())
}

fn print_nav(store: &SessionStore, current_path: &str) {
    let items = visible_items(&store.snapshot());
    let expanded = expanded_group(&items, current_path);

    for item in &items {
        let marker = if item.contains_path(current_path) { '*' } else { ' ' };
        println!("{marker} {:<14} {}", item.label, item.path);
        if item.is_group() && expanded.is_some_and(|g| g.path == item.path) {
            for child in item.children {
                let marker = if current_path.starts_with(child.path) { '*' } else { ' ' };
                println!("  {marker} {:<12} {}", child.label, child.path);
            }
        }
    }
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn init_logging(log_dir: &Path, verbose: bool) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    // Daily rotating file, e.g. dashctl.2026-01-15.log
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("dashctl")
        .filename_suffix("log")
        .build(log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the lifetime of the program
    std::mem::forget(guard);

    // Base filter mutes the HTTP stack, RUST_LOG layers on top
    let base = "hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn";
    let level = if verbose { "info" } else { "warn" };
    let filter = match std::env::var("RUST_LOG") {
        Ok(env) => EnvFilter::new(format!("{base},{env}")),
        Err(_) => EnvFilter::new(format!("{base},{level}")),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    info!("Logging to: {}", log_dir.display());
    Ok(())
}
