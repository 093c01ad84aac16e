use std::cmp::Ordering;
use std::time::Instant;

use cg_compiler::{optimize_filters, DataBundle};
use cg_core::matcher::Matcher;
use cg_core::tab::TabRegistry;
use cg_core::types::{RequestContext, RequestType, NO_TAB};
use cg_core::whitelist::Whitelist;

pub struct BenchOptions {
    pub bundle: DataBundle,
    pub iterations: usize,
    pub pages: usize,
    pub requests_per_page: usize,
    pub seed: u32,
}

#[derive(Clone)]
struct BenchRequest {
    url: String,
    request_type: &'static str,
    tab_id: i32,
    initiator: Option<String>,
}

struct BenchResult {
    op_count: usize,
    total_ms: f64,
    avg_us: f64,
    p50_us: f64,
    p95_us: f64,
    p99_us: f64,
    ops_per_sec: u64,
    blocked_pct: f64,
}

pub fn run(opts: BenchOptions) -> Result<(), String> {
    let BenchOptions {
        mut bundle,
        iterations,
        pages,
        requests_per_page,
        seed,
    } = opts;
    let stats = optimize_filters(&mut bundle.filters);

    println!("============================================================");
    println!("Request matching benchmark");
    println!("============================================================");
    println!(
        "Filters: {} entries in {} groups ({} before optimize)",
        stats.after,
        bundle.filters.groups.len(),
        stats.before
    );

    let keywords: Vec<String> = bundle
        .filters
        .groups
        .iter()
        .map(|group| group.keyword.clone())
        .collect();

    let mut tabs = TabRegistry::new();
    let whitelist = Whitelist::from_domains(["whitelisted0.example"]);
    let requests = generate_workload(&mut tabs, &whitelist, &keywords, pages, requests_per_page, seed);
    if requests.is_empty() {
        return Err("Workload is empty; use --pages and --requests-per-page > 0".to_string());
    }
    println!(
        "Workload: {} pages, {} requests, {} iterations",
        tabs.len(),
        requests.len(),
        iterations
    );

    let matcher = Matcher::new(&bundle.filters);
    warmup(&matcher, &tabs, &requests);
    let result = run_batched(&matcher, &tabs, &requests, iterations.max(1));
    println!();
    println!("{}", format_result(&result));

    Ok(())
}

fn context(req: &BenchRequest) -> RequestContext<'_> {
    RequestContext {
        url: &req.url,
        tab_id: req.tab_id,
        initiator: req.initiator.as_deref(),
        request_type: RequestType::from_str(req.request_type),
    }
}

fn warmup(matcher: &Matcher, tabs: &TabRegistry, requests: &[BenchRequest]) {
    for _ in 0..10 {
        for req in requests {
            let _ = matcher.should_block(&context(req), tabs);
        }
    }
}

fn run_batched(
    matcher: &Matcher,
    tabs: &TabRegistry,
    requests: &[BenchRequest],
    iterations: usize,
) -> BenchResult {
    // One sample per pass over the workload keeps timer overhead out.
    let mut samples_us = Vec::with_capacity(iterations);
    let mut blocked = 0usize;
    let mut total_ops = 0usize;

    for _ in 0..iterations {
        let start = Instant::now();
        for req in requests {
            if matcher.should_block(&context(req), tabs) {
                blocked += 1;
            }
        }
        let elapsed_us = start.elapsed().as_secs_f64() * 1_000_000.0;
        samples_us.push(elapsed_us / requests.len() as f64);
        total_ops += requests.len();
    }

    samples_us.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let avg_us = samples_us.iter().sum::<f64>() / samples_us.len() as f64;
    let total_ms = avg_us * total_ops as f64 / 1000.0;

    BenchResult {
        op_count: total_ops,
        total_ms,
        avg_us,
        p50_us: percentile(&samples_us, 0.50),
        p95_us: percentile(&samples_us, 0.95),
        p99_us: percentile(&samples_us, 0.99),
        ops_per_sec: if total_ms > 0.0 {
            (total_ops as f64 / (total_ms / 1000.0)) as u64
        } else {
            0
        },
        blocked_pct: if total_ops > 0 {
            blocked as f64 * 100.0 / total_ops as f64
        } else {
            0.0
        },
    }
}

fn format_result(result: &BenchResult) -> String {
    format!(
        "should_block:\n  Ops: {}\n  Total: {:.2} ms\n  Avg: {:.3} us\n  P50: {:.3} us\n  P95: {:.3} us\n  P99: {:.3} us\n  Throughput: {} ops/sec\n  Blocked: {:.1}%",
        result.op_count,
        result.total_ms,
        result.avg_us,
        result.p50_us,
        result.p95_us,
        result.p99_us,
        result.ops_per_sec,
        result.blocked_pct,
    )
}

fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let idx = ((values.len() as f64) * p).ceil() as usize;
    let idx = idx.saturating_sub(1).min(values.len() - 1);
    values[idx]
}

fn create_rng(seed: u32) -> impl FnMut() -> f64 {
    let mut state = seed;
    move || {
        state = state.wrapping_mul(1664525).wrapping_add(1013904223);
        (state as f64) / (u32::MAX as f64)
    }
}

fn rand_index(rand: &mut impl FnMut() -> f64, len: usize) -> usize {
    ((rand() * len as f64).floor() as usize).min(len.saturating_sub(1))
}

/// Pages on a few synthetic sites, each issuing script/style/xhr requests.
/// Some URLs carry a keyword of the bundle so the group tier is exercised.
fn generate_workload(
    tabs: &mut TabRegistry,
    whitelist: &Whitelist,
    keywords: &[String],
    pages: usize,
    requests_per_page: usize,
    seed: u32,
) -> Vec<BenchRequest> {
    const TYPES: &[&str] = &["script", "stylesheet", "xmlhttprequest"];
    const PATHS: &[&str] = &["/static/app.js", "/css/site.css", "/api/v1/feed", "/assets/vendor.js"];
    const CDNS: &[&str] = &["cdn.jsdelivr.example", "static.cloud.example", "assets.cdn.example"];

    let mut rand = create_rng(seed);
    let mut requests = Vec::with_capacity(pages * requests_per_page);

    for page in 0..pages {
        let tab_id = page as i32 + 1;
        let site = if page % 50 == 0 {
            format!("whitelisted{}.example", page / 50)
        } else {
            format!("www.site{}.shop{}.example", page, page % 7)
        };
        tabs.upsert(tab_id, Some(format!("https://{}/", site).as_str()), whitelist);

        for n in 0..requests_per_page {
            let host = if rand() < 0.5 {
                site.clone()
            } else {
                CDNS[rand_index(&mut rand, CDNS.len())].to_string()
            };
            let mut url = format!("https://{}{}", host, PATHS[rand_index(&mut rand, PATHS.len())]);
            if !keywords.is_empty() && rand() < 0.3 {
                let keyword = &keywords[rand_index(&mut rand, keywords.len())];
                url.push_str(&format!("?{}={}", keyword, n));
            }

            // A slice of requests comes from service workers without a tab.
            let (tab_id, initiator) = if rand() < 0.05 {
                (NO_TAB, Some(format!("https://{}", site)))
            } else {
                (tab_id, None)
            };

            requests.push(BenchRequest {
                url,
                request_type: TYPES[rand_index(&mut rand, TYPES.len())],
                tab_id,
                initiator,
            });
        }
    }

    requests
}
