//! authdesk - command-line console for the authentication service.
//!
//! Boots the session from the token store, then runs one command against
//! the admin API. "Sign-in required" events raised along the way are
//! reported once the command finishes.

use std::io;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use authdesk_core::auth::CallbackHandler;
use authdesk_core::{ApiClient, Config, SessionEvent, SessionManager, Transport};

const USAGE: &str = "\
Usage: authdesk <command>

Commands:
  sign-in-url              Print the URL that starts a sign-in
  callback <url>           Complete a sign-in from the provider's redirect URL
  login <token> <refresh>  Sign in with an access/refresh token pair
  status                   Show the current session
  refresh                  Exchange the stored refresh token for a new access token
  logout                   Sign out and clear stored tokens
  users                    List users
  applications             List applications
  roles                    List roles";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    SignInUrl,
    Callback(String),
    Login { token: String, refresh_token: String },
    Status,
    Refresh,
    Logout,
    Users,
    Applications,
    Roles,
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let command = match args.as_slice() {
            ["sign-in-url"] => Self::SignInUrl,
            ["callback", url] => Self::Callback(url.to_string()),
            ["login", token, refresh] => Self::Login {
                token: token.to_string(),
                refresh_token: refresh.to_string(),
            },
            ["status"] => Self::Status,
            ["refresh"] => Self::Refresh,
            ["logout"] => Self::Logout,
            ["users"] => Self::Users,
            ["applications"] => Self::Applications,
            ["roles"] => Self::Roles,
            _ => bail!("{}", USAGE),
        };
        Ok(command)
    }

    /// Commands that replace the session don't restore the stored one first.
    fn needs_restored_session(&self) -> bool {
        !matches!(self, Self::SignInUrl | Self::Callback(_) | Self::Login { .. })
    }
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;

    let mut config = Config::load()?;
    config.apply_overrides(|key| std::env::var(key).ok());

    let store = config.token_store()?;
    let transport: Arc<dyn Transport> = Arc::new(config.transport()?);
    let session = SessionManager::new(store, transport.clone());
    let api = ApiClient::new(transport, session.clone());
    let mut events = session.events();

    info!(api_url = %config.api_url, "authdesk starting");
    if command.needs_restored_session() {
        session.initialize().await;
    }

    let result = run(command, &config, &session, &api).await;
    report_events(&mut events, &config);
    result
}

async fn run(
    command: Command,
    config: &Config,
    session: &SessionManager,
    api: &ApiClient,
) -> Result<()> {
    match command {
        Command::SignInUrl => println!("{}", config.sign_in_url()),
        Command::Callback(url) => {
            let handler = CallbackHandler::new(session.clone());
            let user = handler.handle(&url).await?;
            println!("Signed in as {}", user.display_label());
        }
        Command::Login {
            token,
            refresh_token,
        } => {
            let user = session.login(&token, &refresh_token).await?;
            println!("Signed in as {}", user.display_label());
        }
        Command::Status => {
            let state = session.snapshot();
            print_json(&json!({
                "state": state.label(),
                "authenticated": state.is_authenticated(),
                "user": state.user(),
                "error": state.error(),
            }))?;
        }
        Command::Refresh => {
            let Some(refresh_token) = session.snapshot().refresh_token().map(str::to_string)
            else {
                bail!("Not signed in");
            };
            session
                .refresh_access_token(&refresh_token)
                .await
                .context("Token refresh failed")?;
            println!("Access token refreshed");
        }
        Command::Logout => {
            session.logout().await;
            println!("Signed out");
        }
        Command::Users => {
            let page = api.list_users(&[]).await?;
            print_json(&page.users)?;
        }
        Command::Applications => print_json(&api.list_applications().await?)?,
        Command::Roles => print_json(&api.list_roles(&[]).await?)?,
    }
    Ok(())
}

/// Stand-in for navigating to the sign-in screen.
fn report_events(events: &mut broadcast::Receiver<SessionEvent>, config: &Config) {
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::SignInRequired(reason) = event {
            eprintln!(
                "Sign-in required ({:?}). Start a new sign-in at {}",
                reason,
                config.sign_in_url()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse(&args(&["status"])).unwrap(), Command::Status);
        assert_eq!(
            Command::parse(&args(&["login", "a1", "r1"])).unwrap(),
            Command::Login {
                token: "a1".to_string(),
                refresh_token: "r1".to_string()
            }
        );
        assert_eq!(
            Command::parse(&args(&["callback", "/cb?token=a"])).unwrap(),
            Command::Callback("/cb?token=a".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_bad_usage() {
        assert!(Command::parse(&args(&[])).is_err());
        assert!(Command::parse(&args(&["login", "a1"])).is_err());
        assert!(Command::parse(&args(&["frobnicate"])).is_err());
    }

    #[test]
    fn test_sign_in_commands_skip_restore() {
        assert!(!Command::parse(&args(&["login", "a", "r"]))
            .unwrap()
            .needs_restored_session());
        assert!(Command::parse(&args(&["users"])).unwrap().needs_restored_session());
    }
}
