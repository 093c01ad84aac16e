//! ConsentGuard Core Library
//!
//! This crate provides the synchronous engine of the ConsentGuard background:
//! everything that decides, without touching the browser, whether a request is
//! blocked and which payloads a page receives.
//!
//! # Architecture
//!
//! Browser lifecycle events feed the [`TabRegistry`], which derives each tab's
//! hostname ladder and whitelist state. The [`Matcher`] consults the registry
//! for every intercepted request; the injection cascade consults it for every
//! committed frame. Host I/O (storage, scripting, declarative rules) lives in
//! `cg-background`.
//!
//! # Modules
//!
//! - `url`: Hostname normalization and the domain ladder
//! - `types`: Request and match result types
//! - `filters`: The grouped network filter table
//! - `tab`: Tab state and the tab registry
//! - `whitelist`: The in-memory whitelist
//! - `matcher`: Request filter engine
//! - `injection`: Site rules, rule cache and the injection cascade

pub mod filters;
pub mod injection;
pub mod matcher;
pub mod tab;
pub mod types;
pub mod url;
pub mod whitelist;

// Re-export commonly used types
pub use filters::{FilterEntry, FilterTable, KeywordGroup};
pub use injection::{InjectionPlan, InjectionRule, Payload, PayloadPaths, RuleCache, RuleCatalog};
pub use matcher::Matcher;
pub use tab::{Tab, TabRegistry};
pub use types::{MatchDecision, MatchResult, MatchSource, RequestContext, RequestType};
pub use whitelist::Whitelist;
