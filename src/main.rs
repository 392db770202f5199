// Resolution Gateway - command line
// Import a repository and run gateway queries against it without the server.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use resolution_gateway::repository::{
    import_fixture, load_fixture, open_repository, repository_counts,
};
use resolution_gateway::{
    EntityIdentifier, EntityIdentifiers, LocalEngine, MatchBucket, NetworkBuilder, NetworkQuery,
    PathFinder, PathQuery, ProjectionOptions, RelationshipMode, SearchClassifier, SearchCriteria,
    WhyAnalyzer,
};

#[derive(Debug, Parser)]
#[command(
    name = "resolution-gateway",
    version,
    about = "Query resolved entities from the command line"
)]
struct Cli {
    /// SQLite repository of resolved entities
    #[arg(long, global = true, default_value = "gateway.db")]
    repository: PathBuf,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load a JSON fixture of resolved entities into the repository
    Import { fixture: PathBuf },

    /// Shortest relationship path between two entities
    Path {
        from: String,
        to: String,
        #[arg(long, default_value_t = resolution_gateway::path::DEFAULT_MAX_DEGREES)]
        max_degrees: u32,
        /// Entities to avoid (comma separated entity ids or a JSON array)
        #[arg(long)]
        avoid: Option<String>,
        #[arg(long)]
        forbid_avoided: bool,
        /// Data sources the path must include
        #[arg(long = "source")]
        sources: Vec<String>,
    },

    /// Network connecting a set of entities
    Network {
        /// Entities (comma separated entity ids or a JSON array)
        entities: String,
        #[arg(long, default_value_t = resolution_gateway::network::DEFAULT_NETWORK_MAX_DEGREES)]
        max_degrees: u32,
        #[arg(long, default_value_t = resolution_gateway::network::DEFAULT_BUILD_OUT)]
        build_out: u32,
        #[arg(long, default_value_t = resolution_gateway::network::DEFAULT_MAX_ENTITIES)]
        max_entities: u32,
    },

    /// Search by attributes given as KEY:VALUE pairs
    Search {
        #[arg(required = true)]
        attrs: Vec<String>,
        #[arg(long = "include-only")]
        include_only: Vec<String>,
    },

    /// Explain how two entities relate
    WhyEntities { entity1: String, entity2: String },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "resolution_gateway=debug"
    } else {
        "resolution_gateway=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Command::Import { fixture } => run_import(&cli.repository, fixture),
        command => run_query(&cli.repository, command),
    }
}

fn run_import(repository: &Path, fixture_path: &Path) -> Result<()> {
    println!("🗄️  Repository Import - JSON → SQLite + WAL");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!("\n📂 Loading fixture...");
    let fixture = load_fixture(fixture_path)?;
    println!("✓ Loaded {} entities from {}", fixture.entities.len(), fixture_path.display());

    println!("\n🔧 Opening repository...");
    let conn = open_repository(repository)?;
    println!("✓ Repository ready at {}", repository.display());

    println!("\n💾 Importing records...");
    let stats = import_fixture(&conn, &fixture)?;
    println!("✓ Inserted {} records", stats.records_inserted);
    println!("✓ Unchanged {} records", stats.records_unchanged);
    println!("✓ Relationships {}", stats.relationships);
    println!("✓ Default config {}", stats.config_id);

    let counts = repository_counts(&conn)?;
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "✅ Repository holds {} entities, {} records, {} relationships",
        counts.entities, counts.records, counts.relationships
    );

    Ok(())
}

fn run_query(repository: &Path, command: &Command) -> Result<()> {
    if !repository.exists() {
        eprintln!("❌ Repository not found!");
        eprintln!("   Run: resolution-gateway import <fixture.json>");
        eprintln!("   to create it first.");
        std::process::exit(1);
    }
    let engine = LocalEngine::open(repository)?;
    let related = ProjectionOptions::new().with_relationship_mode(RelationshipMode::Partial);
    let unrelated = ProjectionOptions::new().with_relationship_mode(RelationshipMode::None);

    match command {
        Command::Import { .. } => Ok(()),
        Command::Path {
            from,
            to,
            max_degrees,
            avoid,
            forbid_avoided,
            sources,
        } => {
            let avoid = match avoid {
                Some(text) => EntityIdentifiers::parse(text)?,
                None => EntityIdentifiers::new(),
            };
            let query = PathQuery::new(EntityIdentifier::parse(from)?, EntityIdentifier::parse(to)?)
                .with_max_degrees(*max_degrees)
                .with_avoid(avoid)
                .with_forbid_avoided(*forbid_avoided)
                .with_required_sources(sources.iter().map(|s| s.to_uppercase()).collect());
            let answer = PathFinder::new(&engine).find_path(&query, related)?;

            let path = &answer.data.entity_path;
            if path.is_empty() {
                println!("🔍 No path within {} degrees", max_degrees);
            } else {
                println!("🔍 Path: {:?}", path.entity_ids);
            }
            print_json(&answer.data)
        }
        Command::Network {
            entities,
            max_degrees,
            build_out,
            max_entities,
        } => {
            let query = NetworkQuery::new(EntityIdentifiers::parse(entities)?)
                .with_max_degrees(*max_degrees)
                .with_build_out(*build_out)
                .with_max_entities(*max_entities);
            let answer = NetworkBuilder::new(&engine).find_network(&query, related)?;

            println!(
                "🕸️  {} paths, {} entities{}",
                answer.data.entity_paths.len(),
                answer.data.entities.len(),
                if answer.data.max_entity_limit_reached { " (limit reached)" } else { "" }
            );
            print_json(&answer.data)
        }
        Command::Search { attrs, include_only } => {
            let mut criteria = SearchCriteria::new();
            for pair in attrs {
                criteria.merge_pair(pair)?;
            }
            let include_only = MatchBucket::parse_all(include_only.iter().map(String::as_str))?;
            let answer =
                SearchClassifier::new(&engine).search(&criteria, &include_only, unrelated)?;

            println!("🔎 {} results", answer.data.search_results.len());
            print_json(&answer.data)
        }
        Command::WhyEntities { entity1, entity2 } => {
            let answer = WhyAnalyzer::new(&engine).why_entities(
                &EntityIdentifier::parse(entity1)?,
                &EntityIdentifier::parse(entity2)?,
                unrelated,
            )?;
            for result in &answer.data.why_results {
                println!(
                    "❓ {:?} via {}",
                    result.match_info.match_level, result.match_info.why_key
                );
            }
            print_json(&answer.data)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to render result")?;
    println!("{}", text);
    Ok(())
}
