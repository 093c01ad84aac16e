//! Core type definitions for ConsentGuard
//!
//! Request descriptions and match outcomes shared by the matcher, the
//! background orchestration and the bindings.

// =============================================================================
// Request Types (bit mask for type filtering)
// =============================================================================

bitflags::bitflags! {
    /// Request type bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RequestType: u32 {
        const OTHER = 1 << 0;
        const SCRIPT = 1 << 1;
        const IMAGE = 1 << 2;
        const STYLESHEET = 1 << 3;
        const SUBDOCUMENT = 1 << 5;  // iframe/frame
        const MAIN_FRAME = 1 << 6;   // main document
        const XMLHTTPREQUEST = 1 << 7;

        /// Types the request filter is registered for
        const FILTERED = Self::SCRIPT.bits() | Self::STYLESHEET.bits() | Self::XMLHTTPREQUEST.bits();
        /// Types covered by a declarative allow-rule
        const ALLOW_RULE = Self::FILTERED.bits() | Self::IMAGE.bits();
    }
}

impl RequestType {
    /// Parse from browser request type string.
    pub fn from_str(s: &str) -> Self {
        match s {
            "main_frame" => Self::MAIN_FRAME,
            "sub_frame" => Self::SUBDOCUMENT,
            "stylesheet" => Self::STYLESHEET,
            "script" => Self::SCRIPT,
            "image" => Self::IMAGE,
            "xmlhttprequest" => Self::XMLHTTPREQUEST,
            _ => Self::OTHER,
        }
    }

    /// Browser names of the single-bit types contained in this mask.
    pub fn names(self) -> Vec<&'static str> {
        let mut names = Vec::new();
        for (flag, name) in [
            (Self::SCRIPT, "script"),
            (Self::STYLESHEET, "stylesheet"),
            (Self::XMLHTTPREQUEST, "xmlhttprequest"),
            (Self::IMAGE, "image"),
            (Self::MAIN_FRAME, "main_frame"),
            (Self::SUBDOCUMENT, "sub_frame"),
            (Self::OTHER, "other"),
        ] {
            if self.contains(flag) {
                names.push(name);
            }
        }
        names
    }
}

// =============================================================================
// Request Context
// =============================================================================

/// Tab id the browser reports for requests not associated with a tab.
pub const NO_TAB: i32 = -1;

/// Context for a request being matched.
#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    /// Full request URL (may be empty)
    pub url: &'a str,
    /// Tab ID, or [`NO_TAB`]
    pub tab_id: i32,
    /// Initiator origin, if the browser reported one
    pub initiator: Option<&'a str>,
    /// Request type
    pub request_type: RequestType,
}

// =============================================================================
// Match Result
// =============================================================================

/// Final decision for a matched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDecision {
    /// Request proceeds
    Allow,
    /// Request is cancelled
    Block,
}

/// Which step of the filter decided a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchSource {
    /// Request type is never filtered
    UnfilteredType,
    /// No tracked tab owns the request
    UnknownTab,
    /// The owning tab is whitelisted
    Whitelisted,
    /// The request carries no URL
    NoUrl,
    /// A keyword group entry matched
    Group { keyword: String, index: usize },
    /// A flat common entry matched
    Common { index: usize },
    /// A per-site substring matched on this ladder level
    Specific { level: String },
    /// Nothing matched
    NoMatch,
}

/// Result of matching a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    /// The final decision for this request
    pub decision: MatchDecision,
    /// Step that decided (for logging)
    pub source: MatchSource,
    /// Whether an exception list overturned a matching entry
    pub excepted: bool,
    /// Tab the decision was made for, after initiator adoption
    pub tab_id: Option<i32>,
}

impl MatchResult {
    pub(crate) fn allow(source: MatchSource, tab_id: Option<i32>) -> Self {
        Self {
            decision: MatchDecision::Allow,
            source,
            excepted: false,
            tab_id,
        }
    }

    /// True when the request should be cancelled.
    #[inline]
    pub fn is_block(&self) -> bool {
        self.decision == MatchDecision::Block
    }
}

impl Default for MatchResult {
    fn default() -> Self {
        Self::allow(MatchSource::NoMatch, None)
    }
}
