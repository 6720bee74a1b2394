use anyhow::Result;
use brandscope::config::Settings;
use brandscope::engine::Engine;
use brandscope::source::IngestBundle;
use brandscope::store::AggregateStore;
use brandscope::{
    logging, util, AggregatedMetricSet, BrandscopeError, CitationReport, DateRange, RecalcRequest,
    RunKey, Scope, ScopeKey,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "brandscope")]
#[command(about = "Ranked brand visibility summaries and actionable citation pages from scored LLM responses")]
struct Cli {
    /// Config file (default: <config_dir>/brandscope/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database, overrides db_path from the config
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import scored responses and mapping rules from a JSON export
    Ingest {
        /// `{ "responses": [...], "mapping_rules": [...] }`
        file: PathBuf,
    },

    /// Recalculate every metric set of an analysis run
    Recalc {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        run: String,
        /// Range start (YYYY-MM-DD or RFC 3339)
        #[arg(long, requires = "to")]
        from: Option<String>,
        /// Range end, inclusive
        #[arg(long, requires = "from")]
        to: Option<String>,
        /// Recompute even if the input is unchanged
        #[arg(long)]
        force: bool,
    },

    /// Show stored metric sets
    Show {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        run: String,
        /// overall, platform, topic or persona
        #[arg(short, long)]
        scope: Option<String>,
        /// Scope value (requires --scope)
        #[arg(long, requires = "scope")]
        value: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// List actionable pages built from owner-brand citations
    Pages {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        run: String,
        /// Owner brand's primary domain, overrides the config
        #[arg(short, long)]
        domain: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Delete stored metric sets of a run
    Retire {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        run: String,
    },
}

fn main() -> Result<()> {
    logging::init_logging();
    let cli = Cli::parse();

    let mut settings = Settings::load_or_default(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }
    let store = AggregateStore::open(&settings.db_path)?;

    let result = match cli.command {
        Command::Ingest { file } => cmd_ingest(&store, file),
        Command::Recalc {
            user,
            run,
            from,
            to,
            force,
        } => cmd_recalc(&store, &settings, RunKey::new(user, run), from, to, force),
        Command::Show {
            user,
            run,
            scope,
            value,
            json,
        } => cmd_show(&store, RunKey::new(user, run), scope, value, json),
        Command::Pages {
            user,
            run,
            domain,
            json,
        } => cmd_pages(&store, &settings, RunKey::new(user, run), domain, json),
        Command::Retire { user, run } => cmd_retire(&store, RunKey::new(user, run)),
    };

    match result {
        Err(BrandscopeError::NoData(what)) => {
            println!("no data yet: {}", what);
            Ok(())
        }
        other => Ok(other?),
    }
}

fn cmd_ingest(store: &AggregateStore, file: PathBuf) -> Result<(), BrandscopeError> {
    eprintln!("Reading {}...", file.display());
    let bundle = IngestBundle::from_file(&file)?;
    let responses = store.ingest_responses(&bundle.responses)?;
    let rules = store.ingest_rules(&bundle.mapping_rules)?;
    println!("Ingested {} responses, {} mapping rules", responses, rules);
    Ok(())
}

fn cmd_recalc(
    store: &AggregateStore,
    settings: &Settings,
    run: RunKey,
    from: Option<String>,
    to: Option<String>,
    force: bool,
) -> Result<(), BrandscopeError> {
    let date_range = match (from, to) {
        (Some(from), Some(to)) => Some(DateRange::new(
            util::parse_date_bound(&from, false)?,
            util::parse_date_bound(&to, true)?,
        )?),
        _ => None,
    };

    eprintln!("Recalculating {}...", run);
    let engine = Engine::new(store, store, settings);
    let outcome = engine.recalculate(&RecalcRequest {
        run,
        date_range,
        force,
    })?;

    if outcome.cached {
        println!(
            "Unchanged input ({} prompts), stored sets kept. Use --force to recompute.",
            outcome.total_prompts
        );
    } else {
        println!(
            "Recalculated {} scopes from {} prompts",
            outcome.scopes_recalculated, outcome.total_prompts
        );
    }
    Ok(())
}

fn cmd_show(
    store: &AggregateStore,
    run: RunKey,
    scope: Option<String>,
    value: Option<String>,
    json: bool,
) -> Result<(), BrandscopeError> {
    let scope: Option<Scope> = scope.map(|s| s.parse()).transpose()?;
    let sets: Vec<AggregatedMetricSet> = match (scope, value) {
        (Some(scope), Some(value)) => store
            .load_set(&run, &ScopeKey::from_parts(scope, &value))?
            .into_iter()
            .collect(),
        (scope, _) => store.load_sets(&run, scope)?,
    };

    if sets.is_empty() {
        return Err(BrandscopeError::NoData(format!("no metric sets stored for {}", run)));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&sets)?);
        return Ok(());
    }

    for set in &sets {
        print_set(set);
    }
    Ok(())
}

fn print_set(set: &AggregatedMetricSet) {
    println!(
        "=== {} ({} prompts, {} brands, {}..{}) ===",
        set.scope_key(),
        set.total_prompts,
        set.total_brands,
        set.date_range.start.format("%Y-%m-%d"),
        set.date_range.end.format("%Y-%m-%d")
    );
    println!(
        "{:>4}  {:<24} {:>6} {:>6} {:>7} {:>7} {:>6} {:>8} {:>6}",
        "rank", "brand", "vis", "sov%", "avgpos", "words", "depth", "1st/2/3", "delta"
    );
    for b in &set.brands {
        let delta = match b.rank_change {
            Some(d) if d > 0 => format!("+{}", d),
            Some(d) => d.to_string(),
            None => "-".to_string(),
        };
        let owner = if b.is_owner { "*" } else { " " };
        println!(
            "{:>4}{} {:<24} {:>6.1} {:>6.1} {:>7.1} {:>7} {:>6.1} {:>8} {:>6}",
            b.visibility_rank,
            owner,
            util::truncate(&b.brand, 21),
            b.visibility_score,
            b.share_of_voice,
            b.avg_position,
            b.word_count,
            b.depth_of_mention,
            format!("{}/{}/{}", b.first_place_count, b.second_place_count, b.third_place_count),
            delta
        );
    }
    println!();
}

fn cmd_pages(
    store: &AggregateStore,
    settings: &Settings,
    run: RunKey,
    domain: Option<String>,
    json: bool,
) -> Result<(), BrandscopeError> {
    let engine = Engine::new(store, store, settings);
    let report = engine.actionable_pages(&run, domain.as_deref())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    print_pages(&report);
    Ok(())
}

fn print_pages(report: &CitationReport) {
    println!("=== Actionable pages ({}) ===\n", report.entries.len());
    for entry in &report.entries {
        println!(
            "[{:>3}] {} ({})",
            entry.occurrence_count(),
            util::truncate(&entry.url, 90),
            entry.mapping
        );
        let platforms: Vec<&str> = entry.platforms.iter().map(String::as_str).collect();
        println!("      platforms: {}", platforms.join(", "));
        for from in &entry.mapped_from {
            println!("      mapped from: {}", from);
        }
        if entry.source_urls.len() > 1 {
            println!("      {} source urls", entry.source_urls.len());
        }
    }

    if !report.skipped.is_empty() {
        println!("\nSkipped citations:");
        for s in &report.skipped {
            println!("  {} [{}] {}: {}", s.response_id, s.brand, util::truncate(&s.raw_url, 60), s.reason);
        }
    }
}

fn cmd_retire(store: &AggregateStore, run: RunKey) -> Result<(), BrandscopeError> {
    let removed = store.retire_run(&run)?;
    println!("Retired {} metric sets of {}", removed, run);
    Ok(())
}
