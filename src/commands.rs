use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::config::{Config, ConfigError};
use crate::fetcher::{FetchContext, FetchError, Fetcher};
use crate::parser::{self, ParseError};
use crate::store::{EntityStore, NewFeed, NewUser, StoreError, User};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{command} command requires {what}")]
    MissingArgument {
        command: &'static str,
        what: &'static str,
    },
    #[error("unknown command: {0}")]
    Unrecognized(String),
    #[error("{0} does not exist")]
    NotFound(String),
    #[error("{0} already exists")]
    Conflict(String),
    #[error("failed to fetch feed: {0}")]
    Fetch(#[from] FetchError),
    #[error("failed to parse feed: {0}")]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Store(StoreError),
    #[error("failed to write config: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(detail) => CommandError::Conflict(detail),
            other => CommandError::Store(other),
        }
    }
}

/// Report a storage-level uniqueness violation the same way as the pre-check.
fn conflict_as(what: String) -> impl FnOnce(StoreError) -> CommandError {
    move |err| match err {
        StoreError::Conflict(_) => CommandError::Conflict(what),
        other => CommandError::Store(other),
    }
}

/// Every command the CLI understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { name: String },
    Register { name: String },
    Reset,
    Users,
    Agg,
    AddFeed { name: String, url: String },
}

impl Command {
    /// Build a command from its name and positional arguments. Arguments
    /// beyond the ones a command needs are ignored.
    pub fn parse(name: &str, args: &[String]) -> Result<Self, CommandError> {
        let arg = |index: usize, command: &'static str, what: &'static str| {
            args.get(index)
                .cloned()
                .ok_or(CommandError::MissingArgument { command, what })
        };

        match name {
            "login" => Ok(Command::Login {
                name: arg(0, "login", "a username")?,
            }),
            "register" => Ok(Command::Register {
                name: arg(0, "register", "a username")?,
            }),
            "reset" => Ok(Command::Reset),
            "users" => Ok(Command::Users),
            "agg" => Ok(Command::Agg),
            "addfeed" => Ok(Command::AddFeed {
                name: arg(0, "addfeed", "a feed name and URL")?,
                url: arg(1, "addfeed", "a feed name and URL")?,
            }),
            other => Err(CommandError::Unrecognized(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Login { .. } => "login",
            Command::Register { .. } => "register",
            Command::Reset => "reset",
            Command::Users => "users",
            Command::Agg => "agg",
            Command::AddFeed { .. } => "addfeed",
        }
    }
}

/// Everything a handler may touch: the store, the fetcher and the config
/// holding the current user.
pub struct State<S> {
    pub store: S,
    pub fetcher: Fetcher,
    pub config: Config,
    /// Where `config` is written back when the current user changes
    pub config_path: PathBuf,
}

impl<S: EntityStore> State<S> {
    pub fn new(store: S, config: Config, config_path: PathBuf) -> Result<Self, CommandError> {
        let fetcher = Fetcher::new(Duration::from_secs(config.fetch_timeout_secs))?;
        Ok(Self {
            store,
            fetcher,
            config,
            config_path,
        })
    }

    fn set_current_user(&mut self, name: &str) -> Result<(), CommandError> {
        self.config.current_user_name = name.to_string();
        self.config.save(&self.config_path)?;
        info!(user = name, "Current user updated");
        Ok(())
    }

    async fn current_user(&self) -> Result<User, CommandError> {
        let name = &self.config.current_user_name;
        if name.is_empty() {
            return Err(CommandError::NotFound("current user".to_string()));
        }
        self.store
            .find_users_by_name(name)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CommandError::NotFound(format!("user {}", name)))
    }
}

/// Run one command against `state`, writing its output to `out`.
///
/// `agg` fetches under `ctx`; other commands ignore it.
pub async fn run<S: EntityStore, W: Write>(
    state: &mut State<S>,
    command: Command,
    ctx: &FetchContext,
    out: &mut W,
) -> Result<(), CommandError> {
    info!(command = command.name(), "Running command");
    match command {
        Command::Login { name } => handle_login(state, &name, out).await,
        Command::Register { name } => handle_register(state, &name, out).await,
        Command::Reset => handle_reset(state, out).await,
        Command::Users => handle_users(state, out).await,
        Command::Agg => handle_agg(state, ctx, out).await,
        Command::AddFeed { name, url } => handle_add_feed(state, &name, &url, out).await,
    }
}

async fn handle_login<S: EntityStore, W: Write>(
    state: &mut State<S>,
    name: &str,
    out: &mut W,
) -> Result<(), CommandError> {
    let user = state
        .store
        .find_users_by_name(name)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| CommandError::NotFound(format!("user {}", name)))?;

    state.set_current_user(&user.name)?;
    writeln!(out, "Logged in as {}", user.name)?;
    Ok(())
}

async fn handle_register<S: EntityStore, W: Write>(
    state: &mut State<S>,
    name: &str,
    out: &mut W,
) -> Result<(), CommandError> {
    if !state.store.find_users_by_name(name).await?.is_empty() {
        return Err(CommandError::Conflict(format!("user {}", name)));
    }

    // A concurrent register can still win; its Conflict surfaces from here
    let user = state
        .store
        .create_user(NewUser::new(name))
        .await
        .map_err(conflict_as(format!("user {}", name)))?;
    info!(id = %user.id, "User created");

    state.set_current_user(&user.name)?;
    writeln!(out, "Registered user {}", user.name)?;
    Ok(())
}

async fn handle_reset<S: EntityStore, W: Write>(
    state: &mut State<S>,
    out: &mut W,
) -> Result<(), CommandError> {
    let deleted = state.store.delete_all_users().await?;
    info!(deleted, "Users deleted");
    writeln!(out, "Deleted {} users", deleted)?;
    Ok(())
}

async fn handle_users<S: EntityStore, W: Write>(
    state: &mut State<S>,
    out: &mut W,
) -> Result<(), CommandError> {
    let current = &state.config.current_user_name;
    for user in state.store.list_users().await? {
        if &user.name == current {
            writeln!(out, "* {} (current)", user.name)?;
        } else {
            writeln!(out, "* {}", user.name)?;
        }
    }
    Ok(())
}

async fn handle_agg<S: EntityStore, W: Write>(
    state: &mut State<S>,
    ctx: &FetchContext,
    out: &mut W,
) -> Result<(), CommandError> {
    let body = state.fetcher.fetch(ctx, &state.config.agg_url).await?;
    let feed = parser::parse(&body)?;
    info!(title = %feed.title, items = feed.items.len(), "Feed aggregated");

    for item in &feed.items {
        writeln!(out, "- {}", item.title)?;
    }
    Ok(())
}

async fn handle_add_feed<S: EntityStore, W: Write>(
    state: &mut State<S>,
    name: &str,
    url: &str,
    out: &mut W,
) -> Result<(), CommandError> {
    if !state.store.find_feeds_by_name(name).await?.is_empty() {
        return Err(CommandError::Conflict(format!("feed {}", name)));
    }
    if !state.store.find_feeds_by_url(url).await?.is_empty() {
        return Err(CommandError::Conflict(format!("feed with URL {}", url)));
    }

    let owner = state.current_user().await?;
    let feed = state
        .store
        .create_feed(NewFeed::new(owner.id, name, url))
        .await
        .map_err(conflict_as(format!("feed with URL {}", url)))?;
    info!(id = %feed.id, owner = %owner.name, "Feed created");

    writeln!(out, "Added feed {} ({})", feed.name, feed.url)?;
    Ok(())
}
