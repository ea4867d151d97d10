//! Cloud Kitchen CLI - account and session management from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Sign in (password from CK_PASSWORD or --password)
//! ck-cli sign-in -e jane@example.com
//!
//! # Who is using this device right now
//! ck-cli whoami
//!
//! # Show the current session, token masked
//! ck-cli session info
//!
//! # Keep the session fresh until Ctrl+C
//! ck-cli watch
//! ```
//!
//! # Environment Variables
//!
//! - `SUPABASE_URL` / `SUPABASE_ANON_KEY` - hosted backend (required)
//! - `CK_STORAGE_PATH` - local session and guest store
//! - `SENTRY_DSN` - error tracking (optional)

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use cloud_kitchen_core::Role;
use cloud_kitchen_storefront::config::StorefrontConfig;
use cloud_kitchen_storefront::error::AppError;
use cloud_kitchen_storefront::identity::SignUpRequest;
use cloud_kitchen_storefront::{Storefront, StorefrontOptions};
use secrecy::SecretString;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "ck-cli")]
#[command(author, version, about = "Cloud Kitchen account and session tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or refresh the stored session
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Sign in with e-mail and password
    SignIn {
        #[arg(short, long)]
        email: String,

        #[arg(long, env = "CK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Back-office access
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
    /// Create an account
    SignUp {
        #[arg(short, long)]
        email: String,

        #[arg(long, env = "CK_PASSWORD", hide_env_values = true)]
        password: String,

        /// Full name (letters and spaces)
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        phone: Option<String>,

        /// `customer` or `restaurant_owner`
        #[arg(short, long, default_value = "customer")]
        role: Role,
    },
    /// Sign out and forget guest details
    SignOut,
    /// Order as a guest without an account
    Guest {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        phone: String,

        #[arg(short, long)]
        email: String,
    },
    /// Show the current identity
    Whoami,
    /// Send a password reset e-mail
    ResetPassword {
        #[arg(short, long)]
        email: String,
    },
    /// Send the sign-up confirmation e-mail again
    ResendVerification {
        #[arg(short, long)]
        email: String,
    },
    /// Keep the session refreshed and print identity changes until Ctrl+C
    Watch,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Print the session summary
    Info,
    /// Refresh the access token now
    Refresh,
}

#[derive(Subcommand)]
enum AdminAction {
    /// Sign in and require the admin role
    SignIn {
        #[arg(short, long)]
        email: String,

        #[arg(long, env = "CK_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    // Defaults to info level for our crates if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cloud_kitchen_storefront=info,ck_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match StorefrontConfig::from_env() {
        Ok(config) => config,
        Err(e) => exit_with(&AppError::from(e)),
    };

    // Sentry must be initialized before the tracing subscriber
    let _sentry_guard = init_sentry(&config);
    init_tracing();

    if let Err(e) = run(cli, &config).await {
        e.capture();
        exit_with(&e);
    }
}

#[allow(clippy::print_stderr)]
fn exit_with(error: &AppError) -> ! {
    tracing::debug!(error = %error, "Command failed");
    eprintln!("Error: {}", error.user_message());
    std::process::exit(1);
}

async fn run(cli: Cli, config: &StorefrontConfig) -> Result<(), AppError> {
    // Only the long-running command refreshes in the background
    let options = StorefrontOptions {
        refresh: matches!(cli.command, Commands::Watch).then_some(config.refresh),
        ..StorefrontOptions::from(config)
    };
    let storefront = Storefront::connect(config, options).await?;

    let result = dispatch(&storefront, cli.command).await;
    storefront.teardown().await;
    result
}

async fn dispatch(storefront: &Storefront, command: Commands) -> Result<(), AppError> {
    match command {
        Commands::Session { action } => match action {
            SessionAction::Info => commands::session::info(storefront),
            SessionAction::Refresh => commands::session::refresh(storefront).await?,
        },
        Commands::SignIn { email, password } => {
            commands::account::sign_in(storefront, &email, &SecretString::from(password)).await?;
        }
        Commands::Admin { action } => match action {
            AdminAction::SignIn { email, password } => {
                commands::account::admin_sign_in(storefront, &email, &SecretString::from(password))
                    .await?;
            }
        },
        Commands::SignUp {
            email,
            password,
            name,
            phone,
            role,
        } => {
            commands::account::sign_up(
                storefront,
                &SignUpRequest {
                    email,
                    password: SecretString::from(password),
                    full_name: name,
                    phone,
                    role,
                },
            )
            .await?;
        }
        Commands::SignOut => commands::account::sign_out(storefront).await,
        Commands::Guest { name, phone, email } => {
            commands::account::guest(storefront, &name, &phone, &email).await?;
        }
        Commands::Whoami => commands::account::whoami(storefront),
        Commands::ResetPassword { email } => {
            commands::account::reset_password(storefront, &email).await?;
        }
        Commands::ResendVerification { email } => {
            commands::account::resend_verification(storefront, &email).await?;
        }
        Commands::Watch => commands::session::watch(storefront).await,
    }
    Ok(())
}
