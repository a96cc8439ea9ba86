//! CBTS CLI - Command-line client for the CBTS bug tracker
//!
//! Logs in against the REST backend, keeps the session on disk between runs
//! and exposes the bug, project and team endpoints as subcommands.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use cbts_client::{
    CbtsApi, FileTokenStore, GuardDecision, HydrationOutcome, ReqwestTransport, RouteGuard,
    SessionManager,
};
use cbts_core::{
    init_logging, log_operation_error, log_operation_start, log_operation_success, BugPriority,
    BugStatus, BugUpdate, CbtsError, CbtsResult, ClientConfig, Credentials, LoggingConfig,
    NewBug, Registration, Role, Route,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "cbts")]
#[command(about = "Command-line client for the CBTS bug tracker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API base URL, overriding the configuration file
    #[arg(long)]
    api_url: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session
    Login {
        username: String,

        #[arg(long, env = "CBTS_PASSWORD", hide_env_values = true)]
        password: String,

        /// Role you expect to log in as; a different role is refused
        #[arg(long)]
        role: Option<Role>,
    },

    /// End the session on the server and locally
    Logout,

    /// Show the logged-in user
    Whoami,

    /// Create an account
    Register {
        username: String,

        #[arg(long)]
        email: String,

        #[arg(long, env = "CBTS_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long)]
        confirm_password: String,
    },

    /// Request a password reset e-mail
    ResetPassword { email: String },

    /// Work with bugs
    Bugs {
        #[command(subcommand)]
        action: BugCommands,
    },

    /// List projects
    Projects,

    /// List teams
    Teams {
        /// List the members of your team instead
        #[arg(long)]
        members: bool,
    },

    /// List users
    Users,

    /// Check whether a client route is reachable with the stored session
    Route { path: String },

    /// Manage configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Initialize default configuration
        #[arg(long)]
        init: bool,

        /// Validate current configuration
        #[arg(long)]
        validate: bool,
    },
}

#[derive(Subcommand)]
enum BugCommands {
    List,

    Show { id: i64 },

    Create {
        title: String,

        #[arg(short, long, default_value = "")]
        description: String,

        #[arg(short, long)]
        project: i64,

        /// low, medium, high or critical
        #[arg(long, default_value = "medium", value_parser = parse_label::<BugPriority>)]
        priority: BugPriority,

        #[arg(long)]
        team: Option<i64>,

        #[arg(long)]
        assign_to: Option<i64>,
    },

    Update {
        id: i64,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// open, in_progress, resolved or closed
        #[arg(long, value_parser = parse_label::<BugStatus>)]
        status: Option<BugStatus>,

        #[arg(long, value_parser = parse_label::<BugPriority>)]
        priority: Option<BugPriority>,

        #[arg(long)]
        assign_to: Option<i64>,
    },

    Delete { id: i64 },
}

/// Parse a snake_case wire label into one of the serde enums
fn parse_label<T: DeserializeOwned>(value: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_lowercase()))
        .map_err(|_| format!("unknown value '{}'", value))
}

/// Wire label of a serde enum, for display
fn label<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(ClientConfig::default_path);
    let mut config = ClientConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;
    config.apply_env_overrides();
    if let Some(url) = &cli.api_url {
        config.api.base_url = url.clone();
    }
    if cli.verbose {
        config.logging = LoggingConfig {
            format: config.logging.format,
            log_file_path: config.logging.log_file_path.take(),
            ..LoggingConfig::verbose()
        };
    }

    init_logging(&config.logging).context("Failed to initialize logging")?;

    info!("Starting CBTS CLI v{}", env!("CARGO_PKG_VERSION"));

    let result = run(cli.command, config, config_path).await;
    if let Err(e) = &result {
        if let Some(error) = e.downcast_ref::<CbtsError>() {
            if error.requires_login() {
                eprintln!("🔑 Run `cbts login <username>` to start a new session");
            }
        }
    }
    result
}

async fn run(command: Commands, config: ClientConfig, config_path: PathBuf) -> anyhow::Result<()> {
    match command {
        Commands::Config {
            show,
            init,
            validate,
        } => handle_config(&config, &config_path, show, init, validate)?,
        Commands::Login {
            username,
            password,
            role,
        } => {
            let (session, _) = connect(&config)?;
            handle_login(&session, username, password, role).await?;
        }
        Commands::Logout => {
            let (session, _) = connect(&config)?;
            restore_session(&session).await;
            session.logout().await?;
            println!("👋 Logged out");
        }
        Commands::Whoami => {
            let (session, _) = connect(&config)?;
            restore_session(&session).await;
            handle_whoami(&session).await;
        }
        Commands::Register {
            username,
            email,
            password,
            confirm_password,
        } => {
            let (_, api) = connect(&config)?;
            let registration = Registration {
                username,
                email,
                password1: password,
                password2: confirm_password,
            };
            api.register(&registration).await?;
            println!("✅ Account '{}' created", registration.username);
            println!("📧 Check your inbox to verify the e-mail address, then log in");
        }
        Commands::ResetPassword { email } => {
            let (_, api) = connect(&config)?;
            api.request_password_reset(&email).await?;
            println!("📧 If {} belongs to an account, a reset link is on its way", email);
        }
        Commands::Bugs { action } => {
            let (session, api) = connect(&config)?;
            restore_session(&session).await;
            handle_bugs(&api, action).await?;
        }
        Commands::Projects => {
            let (session, api) = connect(&config)?;
            restore_session(&session).await;
            for project in api.list_projects().await? {
                println!("{:>5}  {}  {}", project.id, project.name, project.description);
            }
        }
        Commands::Teams { members } => {
            let (session, api) = connect(&config)?;
            restore_session(&session).await;
            if members {
                for user in api.list_team_members().await? {
                    println!("{:>5}  {:<20} {}", user.id, user.username, user.role);
                }
            } else {
                for team in api.list_teams().await? {
                    let lead = team.lead.map(|id| id.to_string()).unwrap_or_default();
                    println!("{:>5}  {:<20} lead: {}", team.id, team.name, lead);
                }
            }
        }
        Commands::Users => {
            let (session, api) = connect(&config)?;
            restore_session(&session).await;
            for user in api.list_users().await? {
                let email = user.email.unwrap_or_default();
                println!("{:>5}  {:<20} {:<22} {}", user.id, user.username, user.role, email);
            }
        }
        Commands::Route { path } => {
            let route = Route::parse(&path).ok_or_else(|| anyhow!("Unknown route: {}", path))?;
            let (session, _) = connect(&config)?;
            restore_session(&session).await;
            match RouteGuard::new(session.clone()).check(&route).await {
                GuardDecision::Allow => println!("✅ {} is allowed", route),
                GuardDecision::Redirect(target) => println!("↪️  {} redirects to {}", route, target),
                GuardDecision::Pending => println!("⏳ Session is still loading"),
            }
        }
    }

    Ok(())
}

/// Validate configuration and wire the session to the backend and disk
fn connect(config: &ClientConfig) -> anyhow::Result<(Arc<SessionManager>, CbtsApi)> {
    config.validate()?;
    let session = build_session(config)?;
    let api = CbtsApi::new(session.clone());
    Ok((session, api))
}

fn build_session(config: &ClientConfig) -> CbtsResult<Arc<SessionManager>> {
    let transport = Arc::new(ReqwestTransport::new(&config.api)?);
    let store = Arc::new(FileTokenStore::new(config.storage.session_dir_path())?);
    Ok(Arc::new(SessionManager::new(transport, store)))
}

/// Hydrate from disk; failures leave the session anonymous
async fn restore_session(session: &SessionManager) {
    match session.hydrate().await {
        Ok(HydrationOutcome::Expired) => {
            warn!("Stored session has expired");
            eprintln!("⚠️  Your stored session has expired");
        }
        Ok(_) => {}
        Err(e) => {
            e.log();
            eprintln!("⚠️  Could not restore the stored session: {}", e);
        }
    }
}

async fn handle_login(
    session: &SessionManager,
    username: String,
    password: String,
    role: Option<Role>,
) -> CbtsResult<()> {
    let credentials = Credentials::new(username, password);
    let outcome = session.login(&credentials, role).await?;

    println!(
        "✅ Logged in as {} ({})",
        outcome.user.username,
        outcome
            .user
            .known_role()
            .map(|role| role.label().to_string())
            .unwrap_or_else(|| outcome.user.role.clone())
    );
    match outcome.destination {
        Route::Unauthorized => {
            println!("⚠️  Role '{}' has no dashboard in this client", outcome.user.role)
        }
        destination => println!("➡️  Dashboard: {}", destination),
    }
    Ok(())
}

async fn handle_whoami(session: &SessionManager) {
    match session.current_user().await {
        Some(user) if session.is_authenticated() => {
            println!("👤 {} (id {})", user.username, user.id);
            println!("   role:  {}", user.role);
            if let Some(email) = &user.email {
                println!("   email: {}", email);
            }
            if let Some(team) = user.team {
                println!("   team:  {}", team);
            }
        }
        _ => println!("Not logged in"),
    }
}

async fn handle_bugs(api: &CbtsApi, action: BugCommands) -> CbtsResult<()> {
    match action {
        BugCommands::List => {
            let bugs = api.list_bugs().await?;
            if bugs.is_empty() {
                println!("No bugs reported");
            }
            for bug in bugs {
                println!(
                    "#{:<5} {:<12} {:<9} {}",
                    bug.id,
                    label(&bug.status),
                    label(&bug.priority),
                    bug.title
                );
            }
        }
        BugCommands::Show { id } => {
            let bug = api.get_bug(id).await?;
            println!("#{} {}", bug.id, bug.title);
            println!("   status:   {}", label(&bug.status));
            println!("   priority: {}", label(&bug.priority));
            println!("   project:  {}", bug.project);
            if let Some(assignee) = bug.assigned_to {
                println!("   assigned: {}", assignee);
            }
            if let Some(created) = bug.created_at {
                println!("   created:  {}", created.format("%Y-%m-%d %H:%M"));
            }
            if !bug.description.is_empty() {
                println!();
                println!("{}", bug.description);
            }
        }
        BugCommands::Create {
            title,
            description,
            project,
            priority,
            team,
            assign_to,
        } => {
            let bug = api
                .create_bug(&NewBug {
                    title,
                    description,
                    project,
                    priority,
                    team,
                    assigned_to: assign_to,
                })
                .await?;
            println!("🐛 Reported bug #{}: {}", bug.id, bug.title);
        }
        BugCommands::Update {
            id,
            title,
            description,
            status,
            priority,
            assign_to,
        } => {
            let update = BugUpdate {
                title,
                description,
                status,
                priority,
                assigned_to: assign_to,
            };
            let bug = api.update_bug(id, &update).await?;
            println!(
                "✅ Updated bug #{} ({}, {})",
                bug.id,
                label(&bug.status),
                label(&bug.priority)
            );
        }
        BugCommands::Delete { id } => {
            api.delete_bug(id).await?;
            println!("🗑️  Deleted bug #{}", id);
        }
    }
    Ok(())
}

fn handle_config(
    config: &ClientConfig,
    config_path: &Path,
    show: bool,
    init: bool,
    validate: bool,
) -> anyhow::Result<()> {
    if init {
        log_operation_start!("config_init", path = ?config_path);
        if config_path.exists() {
            println!("⚠️  Configuration already exists at: {:?}", config_path);
        } else {
            match ClientConfig::default().save_to_file(config_path) {
                Ok(()) => log_operation_success!("config_init"),
                Err(e) => {
                    log_operation_error!("config_init", e);
                    return Err(e.into());
                }
            }
            println!("✅ Configuration initialized at: {:?}", config_path);
        }
    }

    if show {
        println!("📋 Current configuration ({:?}):", config_path);
        println!("{}", toml::to_string_pretty(config)?);
    }

    if validate {
        match config.validate() {
            Ok(()) => println!("✅ Configuration is valid"),
            Err(e) => {
                println!("❌ Configuration validation failed: {}", e);
                return Err(e.into());
            }
        }
    }

    if !(show || init || validate) {
        println!("Nothing to do; pass --show, --init or --validate");
    }

    Ok(())
}
