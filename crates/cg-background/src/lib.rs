//! ConsentGuard background
//!
//! Event-driven orchestration of the extension background: tab tracking,
//! whitelist persistence, request filtering, declarative rule sync and
//! stylesheet/script injection. Browser APIs are reached through the traits
//! in [`host`].

pub mod background;
pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod router;
pub mod scheduler;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod mock;

pub use background::Background;
pub use config::{Backend, BackgroundConfig, PayloadConfig};
pub use error::{ConfigError, HostError};
pub use events::{
    BlockingResponse, HeadersDetails, InstalledDetails, NavigationDetails, RequestDetails,
    TabChange,
};
pub use host::{
    DynamicRulesHost, Host, InjectionTarget, RawTab, RunAt, ScriptingHost, StorageArea, TabsHost,
};
pub use router::{ActiveTabResponse, Command, Message, TabView};
pub use scheduler::InjectionOutcome;
