use std::{env, sync::Arc};

use huddle_backend::RestClient;
use huddle_core::{ChatApi, ConversationRef, Endpoints};
use huddle_platform::{MemoryCredentialStore, TokenVault};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();

    let base_url =
        env::var("HUDDLE_BACKEND_URL").unwrap_or_else(|_| "http://127.0.0.1:8000/".to_owned());
    let endpoints = match Endpoints::new(&base_url) {
        Ok(endpoints) => endpoints,
        Err(err) => {
            eprintln!("Invalid backend url: {err}");
            std::process::exit(1);
        }
    };

    let vault = TokenVault::new(Arc::new(MemoryCredentialStore::default()), "huddle-smoke");
    let client = match RestClient::new(endpoints, vault) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("Failed to build client: {err}");
            std::process::exit(1);
        }
    };

    let (Ok(user), Ok(password)) = (
        env::var("HUDDLE_SMOKE_USER"),
        env::var("HUDDLE_SMOKE_PASSWORD"),
    ) else {
        println!("Client initialized against {base_url}.");
        println!("Set credentials env vars to run live smoke.");
        println!("Required for live auth: HUDDLE_SMOKE_USER and HUDDLE_SMOKE_PASSWORD");
        return;
    };

    if let Err(err) = client.login(&user, &password).await {
        eprintln!("Login failed: {err}");
        std::process::exit(1);
    }

    match client.me().await {
        Ok(me) => println!("Logged in as {} (id {})", me.username, me.id),
        Err(err) => eprintln!("Profile lookup failed: {err}"),
    }

    let directory = client.directory().await;
    println!(
        "channels={} chain_channels={} dm_groups={} users={}",
        directory.channels.len(),
        directory.chain_channels.len(),
        directory.dm_groups.len(),
        directory.users.len()
    );

    if let Some(channel) = directory.channels.first() {
        let conversation = ConversationRef::Channel(channel.id);
        match client.fetch_history(conversation).await {
            Ok(history) => println!("{conversation}: {} history messages", history.len()),
            Err(err) => eprintln!("History for {conversation} failed: {err}"),
        }
    }
}
