//! The `tether` binary: serve the gateway, or manage credentials.

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use tether_auth::{
    json_rpc_headers, start_login, AuthClient, AuthConfig, CredentialManager, FileCredentialStore,
    PollConfig,
};
use tether_cli::{Cli, Command};
use tether_core::current_unix_timestamp_ms;
use tether_gateway::{run_gateway_server, GatewayState};
use tether_openai::list_remote_models;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let storage = match &cli.credentials_path {
        Some(path) => FileCredentialStore::new(path.clone()),
        None => FileCredentialStore::at_default_path()
            .context("failed to resolve the credential file location")?,
    };
    let credentials =
        CredentialManager::new(Box::new(storage)).context("failed to load credentials")?;
    let auth_client = AuthClient::new(AuthConfig::default())?;

    match cli.command.as_ref() {
        None | Some(Command::Serve) => {
            let state = GatewayState {
                config: cli.gateway_config(),
                auth_client,
                credentials,
            };
            run_gateway_server(state).await
        }
        Some(Command::Login { api_key }) => login(&auth_client, &credentials, api_key).await,
        Some(Command::Status) => {
            status(&credentials);
            Ok(())
        }
        Some(Command::Models) => models(&cli, &auth_client, &credentials).await,
        Some(Command::Logout) => {
            credentials.clear().context("failed to clear credentials")?;
            println!("credentials removed");
            Ok(())
        }
    }
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn login(
    auth_client: &AuthClient,
    credentials: &CredentialManager,
    api_key: &Option<String>,
) -> Result<()> {
    if let Some(api_key) = api_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        let tokens = auth_client
            .exchange_api_key(api_key)
            .await
            .context("API key exchange failed")?;
        credentials.set_auth(
            tokens.access_token,
            tokens.refresh_token,
            Some(api_key.to_string()),
        )?;
        println!("logged in via API key");
        return Ok(());
    }

    let login = start_login();
    println!("open this URL in your browser to log in:\n\n  {}\n", login.url);
    println!("waiting for the login to complete...");
    let tokens = auth_client
        .poll_login(&login.uuid, &login.verifier, &PollConfig::default())
        .await?;
    let Some(tokens) = tokens else {
        bail!("login did not complete; run `tether login` to try again");
    };
    credentials.set_auth(tokens.access_token, tokens.refresh_token, None)?;
    println!("logged in");
    Ok(())
}

fn status(credentials: &CredentialManager) {
    let record = credentials.get_all();
    if record.access_token.is_none() && record.refresh_token.is_empty() {
        println!("not logged in (run `tether login`)");
        return;
    }
    println!(
        "access token: {}",
        if record.access_token.is_some() {
            "present"
        } else {
            "missing"
        }
    );
    println!(
        "refresh token: {}",
        if record.refresh_token.is_empty() {
            "missing"
        } else {
            "present"
        }
    );
    if let Some(expires_at_ms) = record.expires_at_ms {
        let remaining_s = (expires_at_ms - current_unix_timestamp_ms()) / 1_000;
        if remaining_s > 0 {
            println!("access token expires in {remaining_s}s");
        } else {
            println!("access token expired (refresh runs on next use)");
        }
    }
    if record.api_key.is_some() {
        println!("api key: present");
    }
}

async fn models(
    cli: &Cli,
    auth_client: &AuthClient,
    credentials: &CredentialManager,
) -> Result<()> {
    let token = credentials
        .valid_access_token(auth_client)
        .await
        .context("no usable access token; run `tether login` first")?;
    let headers = json_rpc_headers(&token, &cli.timezone(), &Uuid::new_v4().to_string());
    let client = reqwest::Client::new();
    let models = list_remote_models(&client, &cli.base_url, headers)
        .await
        .context("model listing failed")?;
    if models.is_empty() {
        println!("no models reported for this account");
        return Ok(());
    }
    for model in models {
        let display = model
            .display_name
            .or(model.display_name_short)
            .unwrap_or_default();
        if display.is_empty() {
            println!("{}", model.model_id);
        } else {
            println!("{}  ({display})", model.model_id);
        }
    }
    Ok(())
}
