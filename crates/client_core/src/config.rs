use std::{fs, path::Path, str::FromStr, time::Duration};

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

use crate::store::Session;

pub const SETTINGS_FILE: &str = "board.toml";

/// Whether the client checks the workflow graph before asking the remote
/// store to persist a transition. The remote store stays the final authority
/// either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    #[default]
    ClientPrecheck,
    ServerOnly,
}

impl FromStr for TransitionPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "client_precheck" | "precheck" => Ok(Self::ClientPrecheck),
            "server_only" | "server" => Ok(Self::ServerOnly),
            other => Err(format!("unknown transition policy '{other}'")),
        }
    }
}

/// How responses for overlapping moves of the same issue are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOrdering {
    /// Responses for a move older than the newest move of that issue are dropped.
    #[default]
    LatestRequest,
    /// Whichever response resolves last is applied.
    LastResponse,
}

impl FromStr for ResponseOrdering {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "latest_request" => Ok(Self::LatestRequest),
            "last_response" => Ok(Self::LastResponse),
            other => Err(format!("unknown response ordering '{other}'")),
        }
    }
}

/// Per-board behavior switches, split out of [`ClientSettings`] so a board
/// can be loaded without a full settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoardOptions {
    pub transition_policy: TransitionPolicy,
    pub response_ordering: ResponseOrdering,
    pub refetch_after_confirm: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: String,
    pub access_token: Option<String>,
    pub transition_policy: TransitionPolicy,
    pub response_ordering: ResponseOrdering,
    pub refetch_after_confirm: bool,
    pub notification_poll_interval: Duration,
    pub request_timeout: Duration,
    pub max_issue_pages: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000/api/v1".into(),
            access_token: None,
            transition_policy: TransitionPolicy::default(),
            response_ordering: ResponseOrdering::default(),
            refetch_after_confirm: false,
            notification_poll_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            max_issue_pages: 50,
        }
    }
}

impl ClientSettings {
    pub fn session(&self) -> Result<Session, url::ParseError> {
        let session = Session::new(&self.server_url)?;
        Ok(match &self.access_token {
            Some(token) => session.with_token(token.clone()),
            None => session,
        })
    }

    pub fn board_options(&self) -> BoardOptions {
        BoardOptions {
            transition_policy: self.transition_policy,
            response_ordering: self.response_ordering,
            refetch_after_confirm: self.refetch_after_confirm,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    access_token: Option<String>,
    transition_policy: Option<TransitionPolicy>,
    response_ordering: Option<ResponseOrdering>,
    refetch_after_confirm: Option<bool>,
    notification_poll_seconds: Option<u64>,
    request_timeout_seconds: Option<u64>,
    max_issue_pages: Option<usize>,
}

/// Loads `board.toml` from the working directory (if present), then applies
/// environment overrides.
pub fn load_settings() -> anyhow::Result<ClientSettings> {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<ClientSettings> {
    let mut settings = ClientSettings::default();

    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
        let file_cfg: FileSettings = toml::from_str(&raw)
            .with_context(|| format!("failed to parse settings file '{}'", path.display()))?;
        apply_file(&mut settings, file_cfg);
    }

    if let Some(v) = first_of(&env, &["TRACKER_SERVER_URL", "APP__SERVER_URL"]) {
        settings.server_url = v;
    }
    if let Some(v) = first_of(&env, &["TRACKER_TOKEN", "APP__TOKEN"]) {
        settings.access_token = Some(v);
    }
    if let Some(v) = env("APP__TRANSITION_POLICY") {
        match v.parse() {
            Ok(policy) => settings.transition_policy = policy,
            Err(err) => warn!("config: ignoring APP__TRANSITION_POLICY: {err}"),
        }
    }
    if let Some(v) = env("APP__RESPONSE_ORDERING") {
        match v.parse() {
            Ok(ordering) => settings.response_ordering = ordering,
            Err(err) => warn!("config: ignoring APP__RESPONSE_ORDERING: {err}"),
        }
    }
    if let Some(v) = env("APP__REFETCH_AFTER_CONFIRM") {
        match v.trim().parse::<bool>() {
            Ok(flag) => settings.refetch_after_confirm = flag,
            Err(_) => warn!("config: ignoring APP__REFETCH_AFTER_CONFIRM={v}"),
        }
    }
    if let Some(secs) = parse_env::<u64>(&env, "APP__NOTIFICATION_POLL_SECONDS") {
        settings.notification_poll_interval = Duration::from_secs(secs.max(1));
    }
    if let Some(secs) = parse_env::<u64>(&env, "APP__REQUEST_TIMEOUT_SECONDS") {
        settings.request_timeout = Duration::from_secs(secs.max(1));
    }
    if let Some(pages) = parse_env::<usize>(&env, "APP__MAX_ISSUE_PAGES") {
        settings.max_issue_pages = pages.max(1);
    }

    Ok(settings)
}

fn apply_file(settings: &mut ClientSettings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file_cfg.access_token {
        settings.access_token = Some(v);
    }
    if let Some(v) = file_cfg.transition_policy {
        settings.transition_policy = v;
    }
    if let Some(v) = file_cfg.response_ordering {
        settings.response_ordering = v;
    }
    if let Some(v) = file_cfg.refetch_after_confirm {
        settings.refetch_after_confirm = v;
    }
    if let Some(secs) = file_cfg.notification_poll_seconds {
        settings.notification_poll_interval = Duration::from_secs(secs.max(1));
    }
    if let Some(secs) = file_cfg.request_timeout_seconds {
        settings.request_timeout = Duration::from_secs(secs.max(1));
    }
    if let Some(pages) = file_cfg.max_issue_pages {
        settings.max_issue_pages = pages.max(1);
    }
}

fn first_of(env: &impl Fn(&str) -> Option<String>, keys: &[&str]) -> Option<String> {
    keys.iter().rev().find_map(|key| env(key))
}

fn parse_env<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("config: ignoring {key}={raw}");
            None
        }
    }
}
