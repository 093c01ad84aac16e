//! ConsentGuard Compiler
//!
//! This crate turns externally supplied data into `cg-core` tables, and the
//! whitelist into declarative allow-rules for browsers that cannot run the
//! imperative request filter.

pub mod declarative;
pub mod emit;
pub mod optimizer;
pub mod parser;

pub use declarative::{build_update, compile_allow_rules, DeclarativeRule, RuleIdAllocator, RuleUpdate};
pub use emit::{emit_bundle, emit_filter_table};
pub use optimizer::{optimize_filters, OptimizeStats};
pub use parser::{parse_bundle, parse_filter_table, CompileError, DataBundle};
