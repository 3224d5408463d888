use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use research_aggregator::aggregator::{Aggregator, NetworkOptions};
use research_aggregator::config::{default_config_path, find_config_file, init_config_file, load_config, Config};
use research_aggregator::mcp::McpServer;
use research_aggregator::models::{NetworkDirection, SearchQuery, SortBy, SourceKind};
use research_aggregator::resolver;
use research_aggregator::ui::{self, Status};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Research Aggregator - search, cite and explore academic papers across catalogs
#[derive(Parser, Debug)]
#[command(name = "research-aggregator")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Aggregate academic paper metadata from OpenAlex, DBLP, CrossRef, Semantic Scholar and arXiv", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, short, value_enum, global = true, default_value_t = OutputFormat::Auto)]
    output: OutputFormat,

    /// Log line format
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormat>,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Disable the response cache for this run
    #[arg(long, global = true, default_value_t = false)]
    no_cache: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for results
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// Table if stdout is a terminal, JSON otherwise
    Auto,
    /// Human-readable tables
    Table,
    /// Pretty-printed JSON
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

/// Sort order for merged search results
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SortField {
    Relevance,
    Date,
    Citations,
}

impl From<SortField> for SortBy {
    fn from(field: SortField) -> Self {
        match field {
            SortField::Relevance => SortBy::Relevance,
            SortField::Date => SortBy::Date,
            SortField::Citations => SortBy::Citations,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    /// Papers citing each node
    Citing,
    /// References of each node
    Cited,
    Both,
}

impl From<Direction> for NetworkDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Citing => NetworkDirection::Citing,
            Direction::Cited => NetworkDirection::Cited,
            Direction::Both => NetworkDirection::Both,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search all catalogs and merge the results
    #[command(alias = "s")]
    Search {
        /// Search query string
        query: String,

        /// Maximum number of merged results
        #[arg(long, short, default_value_t = 10)]
        limit: usize,

        /// Results to skip in each catalog
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Earliest publication year
        #[arg(long)]
        year_from: Option<i32>,

        /// Latest publication year
        #[arg(long)]
        year_to: Option<i32>,

        /// Venue substring filter
        #[arg(long)]
        venue: Option<String>,

        #[arg(long, value_enum, default_value_t = SortField::Relevance)]
        sort: SortField,

        /// Restrict to these catalogs (openalex, dblp, crossref, semantic, arxiv)
        #[arg(long, short, value_delimiter = ',')]
        sources: Vec<SourceKind>,
    },

    /// Show full metadata for a paper
    #[command(alias = "d")]
    Details {
        /// DOI, arXiv id, OpenAlex id, DBLP key, Semantic Scholar id, URL or title
        paper_id: String,
    },

    /// Print BibTeX for one or more papers
    #[command(alias = "b")]
    Bibtex {
        /// Paper identifiers (at most 50)
        #[arg(required = true)]
        paper_ids: Vec<String>,
    },

    /// List papers citing a paper
    Citations {
        paper_id: String,

        #[arg(long, short, default_value_t = 20)]
        limit: usize,
    },

    /// Search papers by author
    #[command(alias = "a")]
    Author {
        /// Author name
        author: String,

        #[arg(long, short, default_value_t = 20)]
        limit: usize,
    },

    /// Papers related to a paper (Semantic Scholar)
    Related {
        paper_id: String,

        #[arg(long, short, default_value_t = 10)]
        limit: usize,

        /// Resolve other identifier types through a title search
        #[arg(long)]
        fallback: bool,
    },

    /// Build a citation graph around a paper
    Network {
        paper_id: String,

        /// Expansion depth (1-3)
        #[arg(long, default_value_t = 1)]
        depth: u8,

        /// Node budget (10-200)
        #[arg(long, default_value_t = 50)]
        max_nodes: usize,

        #[arg(long, value_enum, default_value_t = Direction::Citing)]
        direction: Direction,
    },

    /// Show response cache statistics
    CacheStats,

    /// Run the MCP server
    Serve {
        /// Serve streamable HTTP on this address instead of stdio
        #[arg(long, value_name = "ADDR")]
        http: Option<String>,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Write a default configuration file
    Init {
        /// Target path (default: user config directory)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },

    /// Print the effective configuration
    Show,

    /// Print the path of the configuration file in use
    Path,
}

fn init_tracing(cli: &Cli, config: &Config) {
    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => config.logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("research_aggregator={}", level)));

    let json = match cli.log_format {
        Some(format) => format == LogFormat::Json,
        None => config.logging.format.eq_ignore_ascii_case("json"),
    };

    // stdout carries results and the stdio MCP transport
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn resolve_format(format: OutputFormat) -> OutputFormat {
    match format {
        OutputFormat::Auto if ui::is_terminal() => OutputFormat::Table,
        OutputFormat::Auto => OutputFormat::Json,
        other => other,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(find_config_file);
    let mut config = load_config(config_path.as_deref())
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;
    if cli.no_cache {
        config.cache.enabled = false;
    }

    init_tracing(&cli, &config);
    if let Some(path) = &config_path {
        tracing::info!("Using config file: {}", path.display());
    }

    match cli.command {
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            let name = command.get_name().to_string();
            clap_complete::generate(shell, &mut command, name, &mut std::io::stdout());
            return Ok(());
        }
        Commands::Config { action } => return run_config(action, &config, config_path),
        Commands::Serve { http } => {
            let aggregator = Arc::new(Aggregator::from_config(&config)?);
            let server = McpServer::new(aggregator)?;
            return match http {
                Some(addr) => {
                    let (bound, handle) = server.run_http(&addr).await?;
                    ui::print_status(Status::Success, &format!("MCP server listening on http://{}", bound));
                    tokio::select! {
                        result = handle => result.context("Server task failed")?,
                        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
                    }
                    Ok(())
                }
                None => Ok(server.run().await?),
            };
        }
        command => {
            let aggregator = Aggregator::from_config(&config)?;
            let format = resolve_format(cli.output);

            let token = CancellationToken::new();
            let interrupt = token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    interrupt.cancel();
                }
            });

            run_command(&aggregator, &token, command, format).await
        }
    }
}

async fn run_command(
    aggregator: &Aggregator,
    token: &CancellationToken,
    command: Commands,
    format: OutputFormat,
) -> Result<()> {
    let json = format == OutputFormat::Json;
    match command {
        Commands::Search {
            query,
            limit,
            offset,
            year_from,
            year_to,
            venue,
            sort,
            sources,
        } => {
            let mut search = SearchQuery::new(query)
                .limit(limit)
                .offset(offset)
                .years(year_from, year_to)
                .sort(sort.into());
            if let Some(venue) = venue {
                search = search.venue(venue);
            }
            if !sources.is_empty() {
                search = search.sources(sources);
            }
            let results = aggregator
                .run_cancellable(token, aggregator.search(&search))
                .await?;
            if json {
                print_json(&results)?;
            } else {
                ui::print_results(&results);
            }
        }

        Commands::Details { paper_id } => {
            let id = resolver::classify(&paper_id);
            let paper = aggregator
                .run_cancellable(token, aggregator.get_details(&id))
                .await?;
            if json {
                print_json(&paper)?;
            } else {
                ui::print_paper(&paper);
            }
        }

        Commands::Bibtex { paper_ids } => {
            let slots = aggregator
                .run_cancellable(token, aggregator.get_bibtex_batch(&paper_ids))
                .await?;
            if json {
                let entries: Vec<_> = slots
                    .iter()
                    .map(|slot| match &slot.result {
                        Ok(entry) => serde_json::json!({
                            "input": slot.input,
                            "key": entry.key,
                            "provenance": entry.provenance,
                            "bibtex": entry.render(),
                        }),
                        Err(e) => serde_json::json!({
                            "input": slot.input,
                            "error": { "kind": e.kind(), "message": e.to_string() },
                        }),
                    })
                    .collect();
                print_json(&entries)?;
            } else {
                ui::print_bibtex_slots(&slots);
            }
            let failed = slots.iter().filter(|s| s.result.is_err()).count();
            if failed == slots.len() {
                anyhow::bail!("No BibTeX entry could be produced");
            }
        }

        Commands::Citations { paper_id, limit } => {
            let id = resolver::classify(&paper_id);
            let papers = aggregator
                .run_cancellable(token, aggregator.get_citations(&id, limit))
                .await?;
            if json {
                print_json(&papers)?;
            } else {
                ui::print_section(&format!("Papers citing {}", paper_id));
                println!("{}", ui::papers_table(&papers));
            }
        }

        Commands::Author { author, limit } => {
            let results = aggregator
                .run_cancellable(token, aggregator.search_author(&author, limit))
                .await?;
            if json {
                print_json(&results)?;
            } else {
                ui::print_results(&results);
            }
        }

        Commands::Related {
            paper_id,
            limit,
            fallback,
        } => {
            let id = resolver::classify(&paper_id);
            let papers = aggregator
                .run_cancellable(token, aggregator.get_related(&id, limit, fallback))
                .await?;
            if json {
                print_json(&papers)?;
            } else {
                ui::print_section(&format!("Related to {}", paper_id));
                println!("{}", ui::papers_table(&papers));
            }
        }

        Commands::Network {
            paper_id,
            depth,
            max_nodes,
            direction,
        } => {
            let id = resolver::classify(&paper_id);
            let options = NetworkOptions {
                depth,
                max_nodes,
                direction: direction.into(),
            };
            let graph = aggregator
                .run_cancellable(token, aggregator.build_citation_network(&id, options))
                .await?;
            if json {
                print_json(&graph)?;
            } else {
                ui::print_graph(&graph);
            }
        }

        Commands::CacheStats => {
            let stats = aggregator.cache_stats();
            if json {
                print_json(&stats)?;
            } else {
                println!("{}", ui::cache_stats_table(&stats));
            }
        }

        Commands::Serve { .. } | Commands::Config { .. } | Commands::Completions { .. } => {
            unreachable!("handled before the aggregator is built")
        }
    }

    Ok(())
}

fn run_config(action: ConfigCommands, config: &Config, in_use: Option<PathBuf>) -> Result<()> {
    match action {
        ConfigCommands::Init { path, force } => {
            let path = path.unwrap_or_else(default_config_path);
            init_config_file(&path, force)?;
            ui::print_status(
                Status::Success,
                &format!("Wrote default configuration to {}", path.display()),
            );
        }
        ConfigCommands::Show => {
            println!("{}", toml::to_string_pretty(config)?);
        }
        ConfigCommands::Path => match in_use {
            Some(path) => println!("{}", path.display()),
            None => ui::print_status(
                Status::Info,
                &format!(
                    "No configuration file found; defaults apply ({} would be used)",
                    default_config_path().display()
                ),
            ),
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_search_with_options() {
        let cli = Cli::parse_from([
            "research-aggregator",
            "search",
            "graph neural networks",
            "--limit",
            "25",
            "--sort",
            "citations",
            "--sources",
            "openalex,semantic",
        ]);
        match cli.command {
            Commands::Search {
                query,
                limit,
                sort,
                sources,
                ..
            } => {
                assert_eq!(query, "graph neural networks");
                assert_eq!(limit, 25);
                assert_eq!(sort, SortField::Citations);
                assert_eq!(sources, vec![SourceKind::OpenAlex, SourceKind::SemanticScholar]);
            }
            _ => panic!("Expected Search command"),
        }
    }

    #[test]
    fn test_cli_verbose_flag() {
        let cli = Cli::parse_from(["research-aggregator", "-vv", "cache-stats"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.output, OutputFormat::Auto);
    }

    #[test]
    fn test_cli_network_defaults() {
        let cli = Cli::parse_from(["research-aggregator", "network", "10.1145/3292500.3330701"]);
        match cli.command {
            Commands::Network {
                depth,
                max_nodes,
                direction,
                ..
            } => {
                assert_eq!(depth, 1);
                assert_eq!(max_nodes, 50);
                assert_eq!(NetworkDirection::from(direction), NetworkDirection::Citing);
            }
            _ => panic!("Expected Network command"),
        }
    }

    #[test]
    fn test_cli_serve_http_mode() {
        let cli = Cli::parse_from(["research-aggregator", "serve", "--http", "127.0.0.1:3000"]);
        match cli.command {
            Commands::Serve { http } => assert_eq!(http.as_deref(), Some("127.0.0.1:3000")),
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_bibtex_requires_ids() {
        assert!(Cli::try_parse_from(["research-aggregator", "bibtex"]).is_err());
    }
}
