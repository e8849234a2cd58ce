//! Tollgate administration CLI
//!
//! Manages OAuth clients and users directly against the configured store.
//!
//! ## Usage Examples
//!
//! ### Create or update a client
//! ```bash
//! tollgate-admin --storage-backend sqlite --database-url sqlite:tollgate.db client set \
//!   --client-id web \
//!   --domain https://app.example.com \
//!   --scope read,write \
//!   --grant-type password --grant-type refresh_token
//! ```
//!
//! ### Register a user with their own organization
//! ```bash
//! tollgate-admin user register --username alice --password hunter2 --organization "Acme"
//! ```
//!
//! Exit codes:
//! - 0: Success
//! - 1: Storage or serialization error
//! - 2: Not found or rejected input

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{Value, json};
use std::process;
use std::sync::Arc;
use thiserror::Error;
use tollgate::{
    directory::{Registration, register_user},
    errors::{DirectoryError, StorageError},
    oauth::{Client, ScopeSet, types::generate_token},
    storage::{OAuthStorage, create_storage_backend, parse_storage_backend},
};

/// Main CLI application structure
#[derive(Parser)]
#[command(
    name = "tollgate-admin",
    about = "Tollgate client and user administration",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Storage backend: memory, sqlite or postgres
    #[arg(long, env = "STORAGE_BACKEND", default_value = "sqlite")]
    storage_backend: String,

    /// Database connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "json")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format options
#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    /// JSON formatted output
    Json,
    /// Pretty-printed JSON output
    JsonPretty,
    /// One `key: value` line per field
    Table,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Manage OAuth clients
    Client {
        #[command(subcommand)]
        command: ClientCommands,
    },
    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
}

#[derive(Subcommand)]
enum ClientCommands {
    /// Create a client or replace an existing one
    Set(SetClientArgs),
    /// Show a client
    Get(ClientIdArgs),
    /// Delete a client
    Delete(ClientIdArgs),
    /// List clients ordered by ID
    List(ListArgs),
}

#[derive(Subcommand)]
enum UserCommands {
    /// Register a user together with an organization they own
    Register(RegisterUserArgs),
}

#[derive(Args)]
struct SetClientArgs {
    #[arg(long)]
    client_id: String,

    /// Client secret; a random one is generated when omitted
    #[arg(long, env = "TOLLGATE_CLIENT_SECRET")]
    client_secret: Option<String>,

    /// Redirect origin, with optional path prefix, that authorize redirects must fall under
    #[arg(long, default_value = "")]
    domain: String,

    /// Authorized scopes, comma separated
    #[arg(long, default_value = "")]
    scope: String,

    /// Authorized grant type (repeatable)
    #[arg(long = "grant-type", value_delimiter = ',')]
    grant_types: Vec<String>,

    /// Public clients authenticate without a secret
    #[arg(long)]
    public: bool,

    /// Owning user ID
    #[arg(long)]
    user_id: Option<String>,
}

#[derive(Args)]
struct ClientIdArgs {
    #[arg(long)]
    client_id: String,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Args)]
struct RegisterUserArgs {
    #[arg(long)]
    username: String,

    #[arg(long, env = "TOLLGATE_USER_PASSWORD")]
    password: String,

    #[arg(long)]
    first_name: Option<String>,

    #[arg(long)]
    last_name: Option<String>,

    /// Name of the organization created for the user
    #[arg(long)]
    organization: String,
}

/// Application errors
#[derive(Debug, Error)]
enum AppError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl AppError {
    fn exit_code(&self) -> i32 {
        match self {
            AppError::Storage(StorageError::ConstraintViolation(_)) => 2,
            AppError::Storage(_) | AppError::Json(_) => 1,
            AppError::Directory(_) | AppError::NotFound(_) => 2,
        }
    }
}

/// Main application entry point
#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(&cli).await {
        eprintln!("Error: {}", err);
        process::exit(err.exit_code());
    }
}

async fn run(cli: &Cli) -> Result<(), AppError> {
    let backend = parse_storage_backend(&cli.storage_backend, cli.database_url.as_deref())?;
    let storage = create_storage_backend(backend).await?;

    let output = match &cli.command {
        Commands::Client { command } => match command {
            ClientCommands::Set(args) => set_client(&*storage, args).await?,
            ClientCommands::Get(args) => {
                let client = storage
                    .find_client_by_id(&args.client_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(args.client_id.clone()))?;
                serde_json::to_value(client)?
            }
            ClientCommands::Delete(args) => {
                storage.delete_client_by_id(&args.client_id).await?;
                json!({ "deleted": args.client_id })
            }
            ClientCommands::List(args) => {
                serde_json::to_value(storage.list_clients(args.limit).await?)?
            }
        },
        Commands::User { command } => match command {
            UserCommands::Register(args) => register(storage, args).await?,
        },
    };

    print_output(&cli.format, &output)
}

async fn set_client(storage: &dyn OAuthStorage, args: &SetClientArgs) -> Result<Value, AppError> {
    let secret = args.client_secret.clone().unwrap_or_else(generate_token);
    let client = Client {
        id: args.client_id.clone(),
        secret: secret.clone(),
        domain: args.domain.clone(),
        public: args.public,
        user_id: args.user_id.clone(),
        scopes: ScopeSet::parse(&args.scope),
        grant_types: args.grant_types.iter().map(String::as_str).collect(),
    };

    storage.set_client(&client.id, &client).await?;

    let mut output = serde_json::to_value(&client)?;
    if args.client_secret.is_none() {
        output["client_secret"] = json!(secret);
    }
    Ok(output)
}

async fn register(
    storage: Arc<dyn OAuthStorage>,
    args: &RegisterUserArgs,
) -> Result<Value, AppError> {
    let (user, organization) = register_user(
        &*storage,
        Registration {
            username: args.username.clone(),
            password: args.password.clone(),
            first_name: args.first_name.clone(),
            last_name: args.last_name.clone(),
            organization_name: args.organization.clone(),
        },
    )
    .await?;

    Ok(json!({ "user": user, "organization": organization }))
}

fn print_output(format: &OutputFormat, output: &Value) -> Result<(), AppError> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(output)?),
        OutputFormat::JsonPretty => println!("{}", serde_json::to_string_pretty(output)?),
        OutputFormat::Table => print_table(output, ""),
    }
    Ok(())
}

fn print_table(value: &Value, prefix: &str) {
    match value {
        Value::Object(fields) => {
            for (key, field) in fields {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                print_table(field, &key);
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                print_table(item, &format!("{}[{}]", prefix, index));
            }
        }
        Value::String(text) => println!("{}: {}", prefix, text),
        other => println!("{}: {}", prefix, other),
    }
}
