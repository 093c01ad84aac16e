//! Popup/options command protocol

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use cg_core::tab::Tab;

use crate::background::Background;
use crate::host::Host;

/// Bare string message asking the background to re-read the whitelist.
pub const UPDATE_WHITELIST: &str = "update_whitelist";

/// Commands sent by the popup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "command", rename_all = "snake_case")]
#[ts(export)]
pub enum Command {
    GetActiveTab {
        #[serde(rename = "tabId")]
        tab_id: i32,
    },
    ToggleExtension {
        #[serde(rename = "tabId")]
        tab_id: i32,
    },
    ReportWebsite {
        #[serde(rename = "tabId")]
        tab_id: i32,
    },
    RefreshPage {
        #[serde(rename = "tabId")]
        tab_id: i32,
    },
    OpenOptionsPage,
}

impl Command {
    pub fn tab_id(&self) -> Option<i32> {
        match self {
            Command::GetActiveTab { tab_id }
            | Command::ToggleExtension { tab_id }
            | Command::ReportWebsite { tab_id }
            | Command::RefreshPage { tab_id } => Some(*tab_id),
            Command::OpenOptionsPage => None,
        }
    }
}

/// A runtime message, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Command(Command),
    UpdateWhitelist,
    Unknown,
}

impl Message {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) if s == UPDATE_WHITELIST => Message::UpdateWhitelist,
            Value::Object(_) => Command::deserialize(value)
                .map(Message::Command)
                .unwrap_or(Message::Unknown),
            _ => Message::Unknown,
        }
    }
}

/// Tab as shown to the popup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct TabView {
    pub id: i32,
    pub url: String,
    /// Hostname, or the whitelisted domain that matched it
    pub hostname: Option<String>,
    pub host_levels: Vec<String>,
    pub whitelisted: bool,
}

impl From<&Tab> for TabView {
    fn from(tab: &Tab) -> Self {
        Self {
            id: tab.id,
            url: tab.url.clone(),
            hostname: tab.hostname.clone(),
            host_levels: tab.host_levels.clone(),
            whitelisted: tab.whitelisted,
        }
    }
}

/// Reply to `get_active_tab`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct ActiveTabResponse {
    pub tab: TabView,
}

impl<H: Host> Background<H> {
    /// Dispatch a runtime message. Returns the reply, if the command has one.
    pub async fn handle_message(&self, message: &Value) -> Option<Value> {
        match Message::from_value(message) {
            Message::UpdateWhitelist => {
                self.reload().await;
                None
            }
            Message::Command(command) => self.handle_command(command).await,
            Message::Unknown => {
                log::debug!("ignoring message {}", message);
                None
            }
        }
    }

    pub async fn handle_command(&self, command: Command) -> Option<Value> {
        if let Some(tab_id) = command.tab_id() {
            if !self.tabs.borrow().contains(tab_id) {
                log::debug!("{:?} for untracked tab", command);
                return None;
            }
        }

        match command {
            Command::GetActiveTab { tab_id } => {
                let response = self.active_tab(tab_id)?;
                match serde_json::to_value(response) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        log::warn!("active tab reply: {}", e);
                        None
                    }
                }
            }
            Command::ToggleExtension { tab_id } => {
                self.toggle(tab_id).await;
                None
            }
            Command::ReportWebsite { tab_id } => {
                if let Some(url) = self.report_url(tab_id) {
                    if let Err(e) = self.host.create(&url).await {
                        log::warn!("opening report page: {}", e);
                    }
                }
                None
            }
            Command::RefreshPage { tab_id } => {
                if let Err(e) = self.host.reload_page(tab_id).await {
                    log::warn!("reloading tab {}: {}", tab_id, e);
                }
                None
            }
            Command::OpenOptionsPage => {
                let url = self.host.extension_url(&self.config.options_page);
                if let Err(e) = self.host.create(&url).await {
                    log::warn!("opening options page: {}", e);
                }
                None
            }
        }
    }

    /// The tracked tab, with its hostname replaced by the whitelist entry
    /// that matched it.
    pub fn active_tab(&self, tab_id: i32) -> Option<ActiveTabResponse> {
        let tabs = self.tabs.borrow();
        let tab = tabs.get(tab_id)?;
        let mut view = TabView::from(tab);
        if tab.whitelisted {
            let whitelist = self.whitelist.borrow();
            if let Some(domain) = whitelist.whitelisted_domain_for(tab) {
                view.hostname = Some(domain.to_string());
            }
        }
        Some(ActiveTabResponse { tab: view })
    }

    /// Issue-report URL for the tab's page.
    pub fn report_url(&self, tab_id: i32) -> Option<String> {
        let tabs = self.tabs.borrow();
        let tab = tabs.get(tab_id)?;
        Some(format!(
            "{}{}",
            self.config.report_url,
            urlencoding::encode(&tab.url)
        ))
    }
}
