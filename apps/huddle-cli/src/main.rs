mod chat_view;
mod config;
mod logging;
mod preferences;
mod profile;

use std::{
    io::{self, Write},
    process::ExitCode,
    sync::Arc,
};

use chat_view::{ChatView, MessageView, ViewUpdate};
use clap::{Parser, Subcommand};
use colored::Colorize;
use config::{CliConfig, ConfigError};
use huddle_backend::{RestClient, WsTransport, session_manager};
use huddle_core::{
    ChatApi, ChatError, ConnectionState, ConversationRef, Directory, ErrorCategory, Participant,
    RetryPolicy, SendDisposition, SessionHandle, SessionManager,
};
use huddle_platform::{CredentialStore, PersistError, TokenVault};
use preferences::{PreferenceError, Preferences};
use profile::{AuthProfile, clear_auth_profile, load_auth_profile, save_auth_profile};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "huddle", version)]
#[command(about = "Terminal client for channel and direct-message chat", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store tokens for this backend
    Login {
        #[arg(short, long)]
        username: Option<String>,
        /// Read from stdin when omitted
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Create an account and log in
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long, default_value = "")]
        email: String,
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Forget stored tokens
    Logout,
    /// List channels, direct messages and users
    Home {
        /// Only show channels whose name contains this text
        #[arg(short, long)]
        search: Option<String>,
    },
    /// Open a conversation, e.g. `channel:3` or `dm:7`
    Chat { conversation: ConversationRef },
    /// Create a channel in the default workspace
    CreateChannel { name: String },
    /// Start (or reuse) a direct message with a user id
    CreateDm { user_id: u64 },
    /// Show or change display preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },
}

#[derive(Subcommand)]
enum PrefsAction {
    Show,
    /// Set one of `theme`, `compact_mode`, `underline_links`,
    /// `show_typing_indicators` or `raise_hand`
    Set { key: String, value: String },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{}", .0.message)]
    Chat(#[from] ChatError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Preference(#[from] PreferenceError),
    #[error("terminal i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// Application-scoped context built once at startup.
struct App {
    config: CliConfig,
    client: RestClient,
    preferences: Preferences,
}

impl App {
    fn build(config: CliConfig) -> Result<Self, CliError> {
        let endpoints = config.endpoints()?;
        let vault = TokenVault::new(
            credential_store(&config),
            config.credential_service(&endpoints),
        );
        let client = RestClient::new(endpoints, vault)?;
        let preferences = Preferences::load(&config.preferences_path())?;
        debug!(
            backend = %client.endpoints().http_base(),
            data_dir = %config.data_dir.display(),
            "cli context ready"
        );

        Ok(Self {
            config,
            client,
            preferences,
        })
    }

    fn profile(&self) -> Option<AuthProfile> {
        load_auth_profile(&self.config.profile_path()).unwrap_or_else(|err| {
            warn!(error = %err, "ignoring unreadable profile");
            None
        })
    }

    /// Current user from `/api/me/`, falling back to the remembered profile
    /// and finally to an anonymous participant.
    async fn current_user(&self) -> Participant {
        match self.client.current_user().await {
            Ok(me) => me,
            Err(err) => {
                warn!(error = %err, "could not resolve current user");
                self.profile()
                    .map(|profile| profile.participant())
                    .unwrap_or_else(Participant::anonymous)
            }
        }
    }

    fn require_login(&self, action: &str) -> Result<(), ChatError> {
        if self.client.has_credentials() {
            Ok(())
        } else {
            Err(ChatError::auth_missing(action))
        }
    }

    async fn login(
        &self,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<(), CliError> {
        let username = match username.or_else(|| self.profile().map(|p| p.username)) {
            Some(username) => username,
            None => prompt("username")?,
        };
        let password = match password {
            Some(password) => password,
            None => prompt("password")?,
        };

        self.client.login(&username, &password).await?;
        self.remember(&username).await?;
        println!("{}", format!("logged in as {username}").green());
        Ok(())
    }

    async fn register(
        &self,
        username: String,
        email: String,
        password: Option<String>,
    ) -> Result<(), CliError> {
        let password = match password {
            Some(password) => password,
            None => prompt("password")?,
        };

        self.client.register(&username, &email, &password).await?;
        self.remember(&username).await?;
        println!("{}", format!("registered and logged in as {username}").green());
        Ok(())
    }

    async fn remember(&self, username: &str) -> Result<(), CliError> {
        let backend_url = self.client.endpoints().http_base().as_str();
        let mut profile = AuthProfile::new(backend_url, username.trim());
        match self.client.me().await {
            Ok(user) => profile = profile.with_user(&user),
            Err(err) => warn!(error = %err, "profile lookup after login failed"),
        }
        save_auth_profile(&self.config.profile_path(), &profile)?;
        Ok(())
    }

    fn logout(&self) -> Result<(), CliError> {
        self.client.logout()?;
        clear_auth_profile(&self.config.profile_path())?;
        println!("logged out");
        Ok(())
    }

    async fn home(&self, search: Option<String>) -> Result<(), CliError> {
        self.require_login("load the directory")?;
        let me = self.current_user().await;
        let directory = self.client.directory().await;
        print_directory(&self.preferences, &directory, &me, search.as_deref());
        Ok(())
    }

    async fn create_channel(&self, name: &str) -> Result<(), CliError> {
        match self.client.create_channel(name).await? {
            Some(channel) => println!("created {} ({})", channel.title(), channel.conversation()),
            None => println!("channel name is empty; nothing created"),
        }
        Ok(())
    }

    async fn create_dm(&self, user_id: u64) -> Result<(), CliError> {
        let me = self.current_user().await;
        let group = self.client.create_dm_group(user_id).await?;
        println!("{} ({})", group.display_name(&me), group.conversation());
        Ok(())
    }

    fn prefs(&mut self, action: PrefsAction) -> Result<(), CliError> {
        if let PrefsAction::Set { key, value } = action {
            self.preferences.set(&key, &value)?;
            self.preferences.save(&self.config.preferences_path())?;
            info!(%key, %value, "preference updated");
        }
        let prefs = &self.preferences;
        println!("theme = {}", prefs.theme);
        println!("compact_mode = {}", prefs.compact_mode);
        println!("underline_links = {}", prefs.underline_links);
        println!("show_typing_indicators = {}", prefs.show_typing_indicators);
        println!("raise_hand = {}", prefs.raise_hand);
        Ok(())
    }

    async fn chat(&self, conversation: ConversationRef) -> Result<(), CliError> {
        let me = self.current_user().await;
        let (title, other) = self.conversation_header(conversation, &me).await;

        let manager = session_manager(&self.client, WsTransport::new())
            .with_options(self.config.session_options());
        let mut handle =
            open_with_retry(&manager, self.config.open_retry, conversation, &me, other).await?;

        let view = ChatView::new(title, me);
        println!("{}", format!("── {} ──", view.title()).bold());
        println!("{}", self.preferences.muted("type a message and press enter; /quit to leave"));

        let result = self.run_chat(&handle, view).await;
        handle.close().await;
        result
    }

    /// Header title and, for DMs, the other participant.
    async fn conversation_header(
        &self,
        conversation: ConversationRef,
        me: &Participant,
    ) -> (String, Option<Participant>) {
        let fallback = conversation.to_string();
        match conversation {
            ConversationRef::Dm(id) => {
                let directory = Directory {
                    dm_groups: self.client.dm_groups().await.unwrap_or_else(|err| {
                        warn!(error = %err, "could not load direct message groups");
                        Vec::new()
                    }),
                    ..Directory::default()
                };
                directory
                    .dm_group(id)
                    .map(|group| (group.display_name(me), group.other_participant(me)))
                    .unwrap_or((fallback, None))
            }
            ConversationRef::Channel(id) => {
                let directory = Directory {
                    channels: self.client.channels().await.unwrap_or_default(),
                    chain_channels: self.client.chain_channels().await.unwrap_or_default(),
                    ..Directory::default()
                };
                let title = directory
                    .channel(id)
                    .map(|channel| channel.title())
                    .unwrap_or(fallback);
                (title, None)
            }
        }
    }

    async fn run_chat(&self, handle: &SessionHandle, mut view: ChatView) -> Result<(), CliError> {
        let mut snapshots = handle.subscribe();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        for update in view.apply(&snapshots.borrow_and_update()) {
            render(&self.preferences, &update);
        }

        loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    for update in view.apply(&snapshot) {
                        render(&self.preferences, &update);
                    }
                    if snapshot.state == ConnectionState::Closed {
                        break;
                    }
                }
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    if line.trim() == "/quit" {
                        break;
                    }
                    match handle.send(&line) {
                        Ok(SendDisposition::Queued | SendDisposition::Ignored) => {}
                        Err(err) => render(&self.preferences, &ViewUpdate::Error(err.message)),
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        Ok(())
    }
}

#[cfg(feature = "os-keyring")]
fn credential_store(_config: &CliConfig) -> Arc<dyn CredentialStore> {
    Arc::new(huddle_platform::KeyringCredentialStore)
}

#[cfg(not(feature = "os-keyring"))]
fn credential_store(config: &CliConfig) -> Arc<dyn CredentialStore> {
    Arc::new(huddle_platform::FileCredentialStore::new(config.credentials_path()))
}

/// Retry `open` on transport failures with the configured backoff.
async fn open_with_retry(
    manager: &SessionManager,
    policy: RetryPolicy,
    conversation: ConversationRef,
    me: &Participant,
    other: Option<Participant>,
) -> Result<SessionHandle, ChatError> {
    let mut attempt = 0;
    loop {
        match manager.open(conversation, me.clone(), other.clone()).await {
            Ok(handle) => return Ok(handle),
            Err(err)
                if err.category == ErrorCategory::Transport && policy.should_retry(attempt) =>
            {
                let delay = policy.delay_for_attempt(attempt);
                warn!(%conversation, attempt, error = %err, "open failed; retrying");
                eprintln!(
                    "{}",
                    format!("{} (retrying in {:.1}s)", err.message, delay.as_secs_f32()).yellow()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn prompt(label: &str) -> Result<String, CliError> {
    print!("{label}: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_owned())
}

fn render(prefs: &Preferences, update: &ViewUpdate) {
    match update {
        ViewUpdate::Status(text) => println!("{}", prefs.muted(&format!("[{text}]"))),
        ViewUpdate::Error(text) => eprintln!("{}", format!("error: {text}").red()),
        ViewUpdate::History(rows) => {
            for row in rows {
                render_message(prefs, row);
            }
            if !rows.is_empty() {
                println!("{}", prefs.muted("── live ──"));
            }
        }
        ViewUpdate::Message(row) => render_message(prefs, row),
    }
}

fn render_message(prefs: &Preferences, row: &MessageView) {
    let name = if row.is_own {
        prefs.own_name(&row.sender)
    } else {
        prefs.other_name(&row.sender)
    };
    if prefs.compact_mode {
        println!("{name}: {}", prefs.body(&row.body));
    } else {
        println!("{name}\n  {}\n", prefs.body(&row.body));
    }
}

fn print_directory(
    prefs: &Preferences,
    directory: &Directory,
    me: &Participant,
    search: Option<&str>,
) {
    let channels = match search {
        Some(query) => directory.search_channels(query),
        None => directory
            .channels
            .iter()
            .chain(directory.chain_channels.iter())
            .collect(),
    };

    println!("{}", "Channels".bold());
    if channels.is_empty() {
        println!("  {}", prefs.muted("none"));
    }
    for channel in channels {
        let marker = if channel.is_chain { " (chain)" } else { "" };
        let conversation = channel.conversation().to_string();
        println!("  {}{marker}  {}", channel.title(), prefs.muted(&conversation));
    }

    if search.is_some() {
        return;
    }

    println!("{}", "Direct messages".bold());
    if directory.dm_groups.is_empty() {
        println!("  {}", prefs.muted("none"));
    }
    for group in &directory.dm_groups {
        println!(
            "  {}  {}",
            group.display_name(me),
            prefs.muted(&group.conversation().to_string())
        );
    }

    println!("{}", "Users".bold());
    for user in directory.users.iter().filter(|user| !user.same_identity(me)) {
        let id = user.id.map(|id| id.to_string()).unwrap_or_else(|| "?".to_owned());
        println!("  {}  {}", user.username, prefs.muted(&format!("id {id}")));
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", format!("error: {err}").red());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = CliConfig::from_env()?;
    let mut app = App::build(config)?;

    match cli.command {
        Commands::Login { username, password } => app.login(username, password).await,
        Commands::Register {
            username,
            email,
            password,
        } => app.register(username, email, password).await,
        Commands::Logout => app.logout(),
        Commands::Home { search } => app.home(search).await,
        Commands::Chat { conversation } => app.chat(conversation).await,
        Commands::CreateChannel { name } => app.create_channel(&name).await,
        Commands::CreateDm { user_id } => app.create_dm(user_id).await,
        Commands::Prefs { action } => app.prefs(action),
    }
}
