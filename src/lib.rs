pub mod app;
pub mod config;
pub mod error;
pub mod indexer;
pub mod model;
pub mod search;
pub mod storage;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::{Value, json};
use std::path::PathBuf;

use app::Registry;
use config::Config;
use error::CameraError;
use model::types::{CameraPatch, ListParams, NewCamera, NewUser, Principal};

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "camreg",
    version,
    about = "Camera registry with a best-effort search index"
)]
pub struct Cli {
    /// Path to the SQLite database (defaults to <data-dir>/cameras.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Override data dir (database, embedded index, logs)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// TOML config file, applied before environment overrides
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the database schema and the index directory
    Init,
    /// Manage users
    User {
        #[command(subcommand)]
        action: UserCommand,
    },
    /// Register a camera
    Create {
        camera_id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        location: Option<String>,
        /// Register the camera as inactive
        #[arg(long)]
        inactive: bool,
        /// Acting username
        #[arg(long = "as", value_name = "USERNAME")]
        as_user: String,
    },
    /// Show one camera
    Get {
        camera_id: String,
        #[arg(long = "as", value_name = "USERNAME")]
        as_user: String,
    },
    /// List cameras, optionally filtered by free text
    List {
        /// Free-text query routed through the search index
        #[arg(long)]
        q: Option<String>,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Include tombstoned cameras (direct listing only)
        #[arg(long)]
        include_deleted: bool,
        #[arg(long = "as", value_name = "USERNAME")]
        as_user: String,
    },
    /// Partially update a camera
    Update {
        camera_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, conflicts_with = "clear_description")]
        description: Option<String>,
        #[arg(long, conflicts_with = "clear_location")]
        location: Option<String>,
        #[arg(long)]
        active: Option<bool>,
        #[arg(long)]
        clear_description: bool,
        #[arg(long)]
        clear_location: bool,
        #[arg(long = "as", value_name = "USERNAME")]
        as_user: String,
    },
    /// Soft-delete (tombstone) a camera
    Delete {
        camera_id: String,
        #[arg(long = "as", value_name = "USERNAME")]
        as_user: String,
    },
    /// Permanently remove a camera (owner or superuser)
    Purge {
        camera_id: String,
        #[arg(long = "as", value_name = "USERNAME")]
        as_user: String,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Create a user
    Add {
        username: String,
        email: String,
        #[arg(long)]
        superuser: bool,
    },
    /// Show a user by username
    Show { username: String },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "camreg", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(db) = cli.db {
        config.set_db_path(db);
    }
    let _log_guard = app::init_logging(&config)?;

    let command = cli.command;
    let output = tokio::task::spawn_blocking(move || -> Result<Value> {
        let registry = Registry::open(&config)?;
        execute(&registry, command)
    })
    .await
    .context("command task panicked")??;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Run one command against an opened registry and return its JSON output.
pub fn execute(registry: &Registry, command: Commands) -> Result<Value> {
    let value = match command {
        Commands::Init => json!({
            "db": registry.store.pool().path().display().to_string(),
            "schema_version": registry.store.schema_version()?,
            "index_backend": registry.index.backend(),
            "version": env!("CARGO_PKG_VERSION"),
            "built_at": option_env!("VERGEN_BUILD_TIMESTAMP"),
        }),
        Commands::User { action } => match action {
            UserCommand::Add {
                username,
                email,
                superuser,
            } => {
                let mut new = NewUser::new(username, email);
                if superuser {
                    new = new.superuser();
                }
                new.validate()?;
                let user = registry
                    .store
                    .create_user(&new)
                    .map_err(CameraError::from)?;
                serde_json::to_value(user)?
            }
            UserCommand::Show { username } => {
                let user = registry
                    .store
                    .get_user_by_username(&username)
                    .map_err(CameraError::from)?
                    .ok_or_else(|| CameraError::NotFound(format!("user '{username}'")))?;
                serde_json::to_value(user)?
            }
        },
        Commands::Create {
            camera_id,
            name,
            description,
            location,
            inactive,
            as_user,
        } => {
            let principal = principal(registry, &as_user)?;
            let mut new = NewCamera::new(camera_id, name);
            if let Some(d) = description {
                new = new.with_description(d);
            }
            if let Some(l) = location {
                new = new.with_location(l);
            }
            if inactive {
                new = new.inactive();
            }
            serde_json::to_value(registry.coordinator.create(&principal, &new)?)?
        }
        Commands::Get { camera_id, as_user } => {
            let principal = principal(registry, &as_user)?;
            serde_json::to_value(registry.router.get(&principal, &camera_id)?)?
        }
        Commands::List {
            q,
            skip,
            limit,
            include_deleted,
            as_user,
        } => {
            let principal = principal(registry, &as_user)?;
            let params = ListParams {
                q,
                skip,
                limit,
                include_deleted,
            };
            serde_json::to_value(registry.router.list(&principal, &params)?)?
        }
        Commands::Update {
            camera_id,
            name,
            description,
            location,
            active,
            clear_description,
            clear_location,
            as_user,
        } => {
            let principal = principal(registry, &as_user)?;
            let mut patch = CameraPatch::default();
            if let Some(n) = name {
                patch = patch.name(n);
            }
            if let Some(d) = description {
                patch = patch.description(d);
            }
            if clear_description {
                patch = patch.clear_description();
            }
            if let Some(l) = location {
                patch = patch.location(l);
            }
            if clear_location {
                patch = patch.clear_location();
            }
            if let Some(a) = active {
                patch = patch.active(a);
            }
            serde_json::to_value(registry.coordinator.update(&principal, &camera_id, &patch)?)?
        }
        Commands::Delete { camera_id, as_user } => {
            let principal = principal(registry, &as_user)?;
            serde_json::to_value(registry.coordinator.soft_delete(&principal, &camera_id)?)?
        }
        Commands::Purge { camera_id, as_user } => {
            let principal = principal(registry, &as_user)?;
            registry.coordinator.hard_delete(&principal, &camera_id)?;
            json!({ "camera_id": camera_id, "purged": true })
        }
        Commands::Completions { .. } => Value::Null,
    };
    Ok(value)
}

/// Resolve the acting user. Unknown and inactive users cannot act.
fn principal(registry: &Registry, username: &str) -> Result<Principal, CameraError> {
    let user = registry
        .store
        .get_user_by_username(username)?
        .ok_or_else(|| CameraError::NotFound(format!("user '{username}'")))?;
    if !user.is_active {
        return Err(CameraError::Forbidden(format!("user '{username}' is inactive")));
    }
    Ok(user.principal())
}

pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "camera-registry", "camreg")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".camreg"))
}
