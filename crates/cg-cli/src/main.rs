//! ConsentGuard CLI
//!
//! CLI tool for compiling data bundles, inspecting filter and injection
//! decisions, and managing a whitelist storage file.

mod bench;
mod storage;

use std::fs;
use std::time::Instant;

use clap::{Parser, Subcommand};

use cg_background::store::{load_whitelist, persist_whitelist};
use cg_background::config::DEFAULT_STORAGE_KEY;
use cg_compiler::{compile_allow_rules, emit_bundle, optimize_filters, parse_bundle, DataBundle, RuleIdAllocator};
use cg_core::injection::{plan_cascade, CascadeTier, Payload, PayloadPaths, RuleCache};
use cg_core::matcher::Matcher;
use cg_core::tab::TabRegistry;
use cg_core::types::{RequestContext, RequestType};
use cg_core::url::{is_http_url, normalize_hostname};
use cg_core::whitelist::Whitelist;

use crate::storage::FileStorage;

#[derive(Parser)]
#[command(name = "cg-cli")]
#[command(about = "ConsentGuard data bundle compiler and tools")]
struct Cli {
    /// Log engine decisions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate, optimize and normalize a data bundle
    Compile {
        /// Input bundle file
        #[arg(short, long)]
        input: String,

        /// Output bundle file
        #[arg(short, long, default_value = "bundle.json")]
        output: String,
    },

    /// Decide a request as the background would
    Check {
        /// Bundle file
        #[arg(short, long)]
        bundle: String,

        /// URL of the page the request belongs to
        #[arg(short, long)]
        page: String,

        /// Request URL
        #[arg(short, long)]
        url: String,

        /// Request type
        #[arg(short = 't', long = "type", default_value = "script")]
        request_type: String,

        /// Whitelist storage file
        #[arg(short, long)]
        storage: Option<String>,
    },

    /// Show what would be injected into a page
    Plan {
        /// Bundle file
        #[arg(short, long)]
        bundle: String,

        /// Page URL
        #[arg(short, long)]
        page: String,

        /// Whitelist storage file
        #[arg(short, long)]
        storage: Option<String>,
    },

    /// Print the declarative allow-rules for a whitelist
    Rules {
        /// Whitelist storage file
        #[arg(short, long)]
        storage: String,
    },

    /// Inspect or edit a whitelist storage file
    Whitelist {
        /// Whitelist storage file
        #[arg(short, long)]
        storage: String,

        #[command(subcommand)]
        action: WhitelistAction,
    },

    /// Measure request matching throughput
    Bench {
        /// Bundle file
        #[arg(short, long)]
        bundle: String,

        /// Passes over the generated workload
        #[arg(long, default_value = "20")]
        iterations: usize,

        /// Synthetic pages
        #[arg(long, default_value = "200")]
        pages: usize,

        /// Requests per page
        #[arg(long, default_value = "25")]
        requests_per_page: usize,

        /// Workload seed
        #[arg(long, default_value = "12648430")]
        seed: u32,
    },
}

#[derive(Subcommand)]
enum WhitelistAction {
    /// List whitelisted domains
    List,
    /// Whitelist a domain (or the hostname of a URL)
    Add { domain: String },
    /// Remove a whitelisted domain
    Remove { domain: String },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .init();

    let result = match cli.command {
        Commands::Compile { input, output } => cmd_compile(&input, &output),
        Commands::Check {
            bundle,
            page,
            url,
            request_type,
            storage,
        } => cmd_check(&bundle, &page, &url, &request_type, storage.as_deref()).await,
        Commands::Plan {
            bundle,
            page,
            storage,
        } => cmd_plan(&bundle, &page, storage.as_deref()).await,
        Commands::Rules { storage } => cmd_rules(&storage).await,
        Commands::Whitelist { storage, action } => cmd_whitelist(&storage, action).await,
        Commands::Bench {
            bundle,
            iterations,
            pages,
            requests_per_page,
            seed,
        } => load_bundle(&bundle).and_then(|bundle| {
            bench::run(bench::BenchOptions {
                bundle,
                iterations,
                pages,
                requests_per_page,
                seed,
            })
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_bundle(path: &str) -> Result<DataBundle, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    parse_bundle(&text).map_err(|e| format!("Invalid bundle '{}': {}", path, e))
}

async fn read_whitelist(path: Option<&str>) -> Result<Whitelist, String> {
    let Some(path) = path else {
        return Ok(Whitelist::new());
    };
    let storage = FileStorage::new(path);
    let whitelist = load_whitelist(&storage, DEFAULT_STORAGE_KEY)
        .await
        .map_err(|e| format!("Failed to load whitelist from '{}': {}", path, e))?;
    Ok(whitelist.unwrap_or_default())
}

fn cmd_compile(input: &str, output: &str) -> Result<(), String> {
    let start = Instant::now();
    let mut bundle = load_bundle(input)?;
    let parse_time = start.elapsed();

    let stats = optimize_filters(&mut bundle.filters);

    let text = serde_json::to_string_pretty(&emit_bundle(&bundle))
        .map_err(|e| format!("Failed to serialize bundle: {}", e))?;
    parse_bundle(&text).map_err(|e| format!("Generated bundle failed validation: {}", e))?;
    fs::write(output, &text).map_err(|e| format!("Failed to write '{}': {}", output, e))?;

    let total_time = start.elapsed();

    println!("Compiled '{}' to '{}'", input, output);
    println!("  Groups:   {}", bundle.filters.groups.len());
    println!(
        "  Entries:  {} -> {} (shadowed {}, deduped {}, empty groups {})",
        stats.before, stats.after, stats.shadowed, stats.deduped, stats.empty_groups
    );
    println!("  Rules:    {} sites, {} css buckets", bundle.catalog.rules.len(), bundle.catalog.commons.len());
    println!("  Size:     {} bytes ({:.1} KB)", text.len(), text.len() as f64 / 1024.0);
    println!(
        "  Time:     {:.1}ms (parse: {:.1}ms)",
        total_time.as_secs_f64() * 1000.0,
        parse_time.as_secs_f64() * 1000.0
    );

    Ok(())
}

async fn cmd_check(
    bundle_path: &str,
    page: &str,
    url: &str,
    request_type: &str,
    storage: Option<&str>,
) -> Result<(), String> {
    let bundle = load_bundle(bundle_path)?;
    let whitelist = read_whitelist(storage).await?;

    let mut tabs = TabRegistry::new();
    let tab = tabs.upsert(1, Some(page), &whitelist);
    if tab.hostname.is_none() {
        return Err(format!("'{}' is not an http(s) page", page));
    }

    let ctx = RequestContext {
        url,
        tab_id: 1,
        initiator: None,
        request_type: RequestType::from_str(request_type),
    };
    let result = Matcher::new(&bundle.filters).match_request(&ctx, &tabs);
    println!(
        "{} {}",
        if result.is_block() { "BLOCK" } else { "ALLOW" },
        url
    );
    println!("  Source:   {:?}", result.source);
    if result.excepted {
        println!("  Excepted: page matches the entry's exception list");
    }

    Ok(())
}

async fn cmd_plan(bundle_path: &str, page: &str, storage: Option<&str>) -> Result<(), String> {
    let bundle = load_bundle(bundle_path)?;
    let whitelist = read_whitelist(storage).await?;
    let paths = PayloadPaths::default();

    let mut tabs = TabRegistry::new();
    let tab = tabs.upsert(1, Some(page), &whitelist);
    if !tab.is_http() {
        println!("Skipped: '{}' is not an http(s) page", page);
        return Ok(());
    }
    if tab.whitelisted {
        println!(
            "Skipped: whitelisted via {}",
            whitelist.whitelisted_domain_for(tab).unwrap_or_default()
        );
        return Ok(());
    }

    let mut cache = RuleCache::new();
    let plan = plan_cascade(tab, &mut cache, &bundle.catalog, &paths);

    println!("Host chain: {}", tab.host_chain().collect::<Vec<_>>().join(" > "));
    println!("  css    {}", paths.common_css);
    println!("  script {}", paths.embeds_js);
    match &plan.tier {
        CascadeTier::Exact(host) => println!("Site rule: {} (exact)", host),
        CascadeTier::Level(host) => println!("Site rule: {} (parent level)", host),
        CascadeTier::Fallback => println!("Site rule: none, fallback"),
    }
    for payload in &plan.payloads {
        match payload {
            Payload::Css(css) => println!("  css    {:?}", css),
            Payload::Script(file) => println!("  script {}", file),
        }
    }

    Ok(())
}

async fn cmd_rules(storage: &str) -> Result<(), String> {
    let whitelist = read_whitelist(Some(storage)).await?;
    let rules = compile_allow_rules(&whitelist, &mut RuleIdAllocator::new());
    let text = serde_json::to_string_pretty(&rules)
        .map_err(|e| format!("Failed to serialize rules: {}", e))?;
    println!("{}", text);
    Ok(())
}

/// Hostname of a URL, or the argument itself lower-cased.
fn domain_arg(arg: &str) -> Result<String, String> {
    if is_http_url(arg) {
        return normalize_hostname(arg, true).ok_or_else(|| format!("No hostname in '{}'", arg));
    }
    let domain = arg.trim().trim_end_matches('.').to_ascii_lowercase();
    if domain.is_empty() || domain.contains('/') {
        return Err(format!("Invalid domain '{}'", arg));
    }
    Ok(domain)
}

async fn cmd_whitelist(path: &str, action: WhitelistAction) -> Result<(), String> {
    let storage = FileStorage::new(path);
    let mut whitelist = load_whitelist(&storage, DEFAULT_STORAGE_KEY)
        .await
        .map_err(|e| format!("Failed to load whitelist from '{}': {}", path, e))?
        .unwrap_or_default();

    let changed = match action {
        WhitelistAction::List => {
            for domain in whitelist.iter() {
                println!("{}", domain);
            }
            println!("{} domain(s)", whitelist.len());
            return Ok(());
        }
        WhitelistAction::Add { domain } => {
            let domain = domain_arg(&domain)?;
            let added = whitelist.insert(domain.clone());
            println!("{} {}", if added { "Added" } else { "Already present:" }, domain);
            added
        }
        WhitelistAction::Remove { domain } => {
            let domain = domain_arg(&domain)?;
            let removed = whitelist.remove(&domain);
            println!("{} {}", if removed { "Removed" } else { "Not present:" }, domain);
            removed
        }
    };

    if changed {
        persist_whitelist(&storage, DEFAULT_STORAGE_KEY, &whitelist)
            .await
            .map_err(|e| format!("Failed to save whitelist to '{}': {}", path, e))?;
    }
    Ok(())
}
