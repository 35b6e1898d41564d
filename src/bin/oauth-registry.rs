//! OAuth registry administration CLI.
//!
//! Operates directly on the configured backing store, using the same
//! environment variables as any other process embedding the registries
//! (`STORAGE_BACKEND`, `DATABASE_URL`, `STORAGE_PREFIX`, ...).
//!
//! ```bash
//! oauth-registry client create --name web --redirect-uri https://web.example.com/callback
//! oauth-registry token list --user alice
//! oauth-registry token revoke --name <token>
//! oauth-registry purge
//! ```

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use oauth_registry::config::{Config, version};
use oauth_registry::errors::RegistryError;
use oauth_registry::oauth::types::{AccessToken, GrantMethod, OAuthClient, generate_token};
use oauth_registry::registry::{BackendRegistryBuilder, RegistrySet, StorageFactory};
use oauth_registry::storage::Deadline;
use serde::Serialize;
use std::process;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(
    name = "oauth-registry",
    about = "Manage OAuth clients and tokens in the registry backing store",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Deadline applied to every registry operation
    #[arg(long, default_value = "30s", value_parser = parse_timeout)]
    timeout: std::time::Duration,

    #[arg(long, value_enum, default_value = "json-pretty")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Json,
    JsonPretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage explicitly registered clients
    #[command(subcommand)]
    Client(ClientCommands),
    /// Inspect and revoke access tokens
    #[command(subcommand)]
    Token(TokenCommands),
    /// Reclaim expired authorization codes and access tokens
    Purge,
}

#[derive(Subcommand)]
enum ClientCommands {
    /// Register a new client
    Create(CreateClientArgs),
    /// Show a client
    Get(NameArgs),
    /// List every registered client
    List,
    /// Delete a client and revoke its access tokens
    Delete(NameArgs),
}

#[derive(Subcommand)]
enum TokenCommands {
    /// List access tokens of a user or a client
    List(ListTokensArgs),
    /// Revoke an access token
    Revoke(NameArgs),
}

#[derive(Args)]
struct NameArgs {
    #[arg(long)]
    name: String,
}

#[derive(Args)]
struct CreateClientArgs {
    #[arg(long)]
    name: String,

    /// Client secret; generated when omitted
    #[arg(long)]
    secret: Option<String>,

    #[arg(long = "redirect-uri")]
    redirect_uris: Vec<String>,

    /// auto, prompt or deny; the process default applies when omitted
    #[arg(long)]
    grant_method: Option<GrantMethod>,

    /// Public clients authenticate without a secret
    #[arg(long)]
    public: bool,

    #[arg(long)]
    access_token_max_age_seconds: Option<i64>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ListTokensArgs {
    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    client: Option<String>,
}

/// Client as printed, without its secrets
#[derive(Serialize)]
struct ClientView<'a> {
    name: &'a str,
    redirect_uris: &'a [String],
    grant_method: Option<GrantMethod>,
    public: bool,
    access_token_max_age_seconds: Option<i64>,
    resource_version: u64,
}

#[derive(Serialize)]
struct CreatedClient<'a> {
    #[serde(flatten)]
    client: ClientView<'a>,
    /// Only shown once, on creation
    #[serde(skip_serializing_if = "Option::is_none")]
    generated_secret: Option<&'a str>,
}

#[derive(Serialize)]
struct PurgeReport {
    authorize_tokens: usize,
    access_tokens: usize,
}

fn parse_timeout(value: &str) -> Result<std::time::Duration, String> {
    duration_str::parse(value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "oauth_registry=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(&cli).await {
        Ok(()) => process::exit(0),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            // Registry failures are distinguished from setup failures
            let code = match err.downcast_ref::<RegistryError>() {
                Some(RegistryError::NotFound(_)) => 2,
                Some(RegistryError::AlreadyExists(_)) | Some(RegistryError::Conflict(_)) => 3,
                Some(_) => 4,
                None => 1,
            };
            process::exit(code);
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config = Config::new()?;
    tracing::debug!(version = %version()?, backend = %config.storage_backend, "starting");

    let factory = StorageFactory::new(BackendRegistryBuilder::from_config(&config)?);
    let registries = factory.registries().await?;
    let deadline = Deadline::after(cli.timeout);

    match &cli.command {
        Commands::Client(command) => client_command(cli, &registries, command, deadline).await,
        Commands::Token(command) => token_command(cli, &registries, command, deadline).await,
        Commands::Purge => {
            let report = PurgeReport {
                authorize_tokens: registries.authorize_tokens.purge_expired(deadline).await?,
                access_tokens: registries.access_tokens.purge_expired(deadline).await?,
            };
            print(cli, &report)
        }
    }
}

async fn client_command(
    cli: &Cli,
    registries: &RegistrySet,
    command: &ClientCommands,
    deadline: Deadline,
) -> Result<()> {
    match command {
        ClientCommands::Create(args) => {
            let generated_secret = match (&args.secret, args.public) {
                (None, false) => Some(generate_token()),
                _ => None,
            };
            let client = OAuthClient {
                name: args.name.clone(),
                secret: args
                    .secret
                    .clone()
                    .or_else(|| generated_secret.clone())
                    .unwrap_or_default(),
                additional_secrets: vec![],
                redirect_uris: args.redirect_uris.clone(),
                grant_method: args.grant_method,
                public: args.public,
                access_token_max_age_seconds: args.access_token_max_age_seconds,
            };
            let created = registries.clients.create(&client, deadline).await?;
            print(
                cli,
                &CreatedClient {
                    client: view(&created.resource, created.resource_version.as_u64()),
                    generated_secret: generated_secret.as_deref(),
                },
            )
        }
        ClientCommands::Get(args) => {
            let client = registries.clients.get(&args.name, deadline).await?;
            print(cli, &view(&client.resource, client.resource_version.as_u64()))
        }
        ClientCommands::List => {
            let clients = registries.clients.list(deadline).await?;
            let views: Vec<_> = clients
                .iter()
                .map(|client| view(&client.resource, client.resource_version.as_u64()))
                .collect();
            print(cli, &views)
        }
        ClientCommands::Delete(args) => {
            registries.clients.delete(&args.name, deadline).await?;
            let revoked = registries
                .access_tokens
                .revoke_all_for_client(&args.name, deadline)
                .await?;
            print(cli, &serde_json::json!({"deleted": args.name, "revoked_tokens": revoked}))
        }
    }
}

async fn token_command(
    cli: &Cli,
    registries: &RegistrySet,
    command: &TokenCommands,
    deadline: Deadline,
) -> Result<()> {
    match command {
        TokenCommands::List(args) => {
            let tokens: Vec<AccessToken> = match (&args.user, &args.client) {
                (Some(user), _) => registries.access_tokens.list_by_user(user, deadline).await?,
                (None, Some(client)) => {
                    registries.access_tokens.list_by_client(client, deadline).await?
                }
                (None, None) => vec![],
            };
            print(cli, &tokens)
        }
        TokenCommands::Revoke(args) => {
            registries.access_tokens.revoke(&args.name, deadline).await?;
            print(cli, &serde_json::json!({"revoked": args.name}))
        }
    }
}

fn view(client: &OAuthClient, resource_version: u64) -> ClientView<'_> {
    ClientView {
        name: &client.name,
        redirect_uris: &client.redirect_uris,
        grant_method: client.grant_method,
        public: client.public,
        access_token_max_age_seconds: client.access_token_max_age_seconds,
        resource_version,
    }
}

fn print<T: Serialize>(cli: &Cli, value: &T) -> Result<()> {
    let output = match cli.format {
        OutputFormat::Json => serde_json::to_string(value)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(value)?,
    };
    println!("{}", output);
    Ok(())
}
