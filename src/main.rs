use anyhow::{Context, Result};
use tracing::info;
use tubecast::config::Config;
use tubecast::credentials::TokenStore;
use tubecast::oauth::{AuthorizationRequest, OAuthFlow};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tubecast=info".into()),
        )
        .init();

    let config = Config::from_env();
    let store = TokenStore::new(
        config.storage.token_store_path.clone(),
        config.storage.active_account_path.clone(),
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("auth-url") => {
            let flow = OAuthFlow::new(&config, store);
            let url = flow.authorization_url(&AuthorizationRequest::default())?;
            println!("{url}");
        }
        Some("exchange") => {
            let code = args.get(1).context("usage: tubecast exchange <code>")?;
            let flow = OAuthFlow::new(&config, store);
            let tokens = flow.exchange_code(code).await?;
            println!("{}", serde_json::to_string_pretty(&tokens)?);
        }
        Some("refresh") => {
            let token = args
                .get(1)
                .context("usage: tubecast refresh <refresh-token>")?;
            let flow = OAuthFlow::new(&config, store);
            let tokens = flow.refresh(token).await?;
            println!("{}", serde_json::to_string_pretty(&tokens)?);
        }
        Some("accounts") => {
            let accounts = store.list_accounts();
            if accounts.is_empty() {
                println!("No linked accounts. Run `tubecast auth-url` to start.");
            }
            for account in accounts {
                let marker = if account.active { "*" } else { " " };
                let name = account
                    .display_name
                    .or(account.label)
                    .unwrap_or_default();
                println!("{marker} {}  {name}", account.account_id);
            }
        }
        Some("set-active") => {
            let id = args
                .get(1)
                .context("usage: tubecast set-active <account-id>")?;
            store.set_active(id)?;
            info!(account_id = %id, "Active account updated");
        }
        _ => {
            eprintln!("usage: tubecast <auth-url | exchange <code> | refresh <token> | accounts | set-active <id>>");
            std::process::exit(2);
        }
    }

    Ok(())
}
