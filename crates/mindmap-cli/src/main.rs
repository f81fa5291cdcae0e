mod config;
mod llm;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use mindmap_core::{
    Block, BlockAction, Embedder, Generator, MindmapStore, Orchestrator, TurnOutcome,
};
use mindmap_store::{JsonFileStore, SqliteStore};

use crate::config::{Config, EmbeddingProvider, StoreBackend};
use crate::llm::{Endpoint, OpenAiClient};

#[derive(Parser)]
#[command(
    name = "mindmap",
    version,
    about = "Branching chat: every topic shift becomes its own block"
)]
struct Cli {
    /// Snapshot file (overrides [store] path)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat loop
    Chat,

    /// Send one message to the current conversation
    Say {
        /// Message text
        message: String,
    },

    /// Start a new conversation graph
    New {
        /// First message of the new thread
        message: String,
    },

    /// Print the block tree of the current graph
    Map,

    /// List blocks of the current graph
    Blocks,

    /// List all conversation graphs
    Graphs,

    /// Move to another block of the current graph
    Switch {
        /// Block ID (a unique prefix is enough)
        block: String,
    },

    /// Move to another conversation graph
    SwitchGraph {
        /// Graph ID (a unique prefix is enough)
        graph: String,
    },

    /// Delete a block and everything below it
    Delete {
        /// Block ID (a unique prefix is enough)
        block: String,
    },

    /// Print the current graph as JSON
    Export {
        /// Emit nodes and links for a graph renderer instead
        #[arg(long)]
        viz: bool,
    },

    /// Delete every conversation
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the active configuration
    Config,
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn default_store_path(backend: StoreBackend) -> PathBuf {
    let file = match backend {
        StoreBackend::Json => "mindmap.json",
        StoreBackend::Sqlite => "mindmap.db",
    };
    directories::ProjectDirs::from("dev", "mindmap", "mindmap")
        .map(|dirs| dirs.data_dir().join(file))
        .unwrap_or_else(|| PathBuf::from(file))
}

fn store_path(cfg: &Config, cli_path: Option<PathBuf>) -> PathBuf {
    cli_path
        .or_else(|| cfg.store.path.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| default_store_path(cfg.store.backend))
}

fn open_store(cfg: &Config, path: PathBuf) -> Result<Box<dyn MindmapStore>> {
    Ok(match cfg.store.backend {
        StoreBackend::Json => Box::new(JsonFileStore::new(path).context("failed to open snapshot file")?),
        StoreBackend::Sqlite => Box::new(SqliteStore::new(&path).context("failed to open database")?),
    })
}

fn chat_client(cfg: &Config) -> OpenAiClient {
    let llm = &cfg.llm;
    let chat = Endpoint::from_env(&llm.base_url, &llm.model, &llm.api_key_env);
    let emb = &cfg.embeddings;
    let embeddings = Endpoint::from_env(
        emb.base_url.as_deref().unwrap_or(&llm.base_url),
        emb.model(),
        emb.api_key_env.as_deref().unwrap_or(&llm.api_key_env),
    );
    OpenAiClient::new(chat, embeddings, Duration::from_secs(llm.timeout_secs))
        .with_sampling(llm.temperature, llm.max_tokens)
}

fn init_embedder(cfg: &Config) -> Result<Box<dyn Embedder>> {
    match cfg.embeddings.provider {
        EmbeddingProvider::Api => {
            if cfg.embeddings.base_url.is_none() {
                bail!(
                    "[embeddings] provider = \"api\" needs [embeddings] base_url \
                     pointing at an endpoint that serves /embeddings"
                );
            }
            Ok(Box::new(chat_client(cfg)))
        }
        EmbeddingProvider::Local => local_embedder(cfg.embeddings.model()),
    }
}

#[cfg(feature = "embeddings")]
fn local_embedder(model: &str) -> Result<Box<dyn Embedder>> {
    Ok(Box::new(mindmap_core::FastEmbedder::from_name(model)?))
}

#[cfg(not(feature = "embeddings"))]
fn local_embedder(_model: &str) -> Result<Box<dyn Embedder>> {
    bail!("[embeddings] provider = \"local\" needs a build with the `embeddings` feature")
}

fn open_orchestrator(cfg: &Config, cli_path: Option<PathBuf>) -> Result<Orchestrator> {
    let store = open_store(cfg, store_path(cfg, cli_path))?;
    let generator: Box<dyn Generator> = Box::new(chat_client(cfg));
    let embedder = init_embedder(cfg)?;
    Orchestrator::new(generator, embedder, store, cfg.engine.clone())
        .context("failed to start conversation engine")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config()?;

    if let Commands::Config = cli.command {
        return cmd_config(&cfg, cli.store);
    }

    let mut orch = open_orchestrator(&cfg, cli.store)?;

    match cli.command {
        Commands::Chat => cmd_chat(&mut orch),
        Commands::Say { message } => cmd_say(&mut orch, &message, false),
        Commands::New { message } => cmd_say(&mut orch, &message, true),
        Commands::Map => cmd_map(&orch),
        Commands::Blocks => cmd_blocks(&orch),
        Commands::Graphs => cmd_graphs(&orch),
        Commands::Switch { block } => cmd_switch(&mut orch, &block),
        Commands::SwitchGraph { graph } => cmd_switch_graph(&mut orch, &graph),
        Commands::Delete { block } => cmd_delete(&mut orch, &block),
        Commands::Export { viz } => cmd_export(&orch, viz),
        Commands::Clear { yes } => cmd_clear(&mut orch, yes),
        Commands::Config => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_say(orch: &mut Orchestrator, message: &str, new_thread: bool) -> Result<()> {
    let outcome = if new_thread {
        orch.start_new_conversation(message)?
    } else {
        orch.continue_conversation(message)?
    };
    print_outcome(orch, &outcome);
    Ok(())
}

fn print_outcome(orch: &Orchestrator, outcome: &TurnOutcome) {
    let label = orch
        .current_block()
        .map(Block::label)
        .unwrap_or_else(|| short_id(&outcome.block_id));
    let note = if outcome.new_graph {
        " (new conversation)".to_string()
    } else if outcome.action == BlockAction::Continue {
        String::new()
    } else {
        format!(" ({}, {:.2})", outcome.action, outcome.confidence)
    };
    println!("[{label}]{note}");
    println!();
    println!("{}", outcome.response);
}

fn cmd_map(orch: &Orchestrator) -> Result<()> {
    match orch.current_graph() {
        Some(graph) => {
            println!("Conversation: {} ({})", graph.title(), graph.id);
            println!();
            print!("{}", graph.render_tree());
        }
        None => println!("No conversations yet."),
    }
    Ok(())
}

fn cmd_blocks(orch: &Orchestrator) -> Result<()> {
    let blocks = orch.list_blocks();
    if blocks.is_empty() {
        println!("No blocks yet.");
        return Ok(());
    }
    let current = orch.current_block().map(|b| b.id.as_str());

    println!("  {:<10} {:<40} {:>5}", "ID", "Title", "Msgs");
    println!("{}", "-".repeat(60));
    for block in blocks {
        let marker = if Some(block.id.as_str()) == current { "*" } else { " " };
        println!(
            "{marker} {:<10} {:<40} {:>5}",
            short_id(&block.id),
            truncate(&block.label(), 40),
            block.conversation_refs.len()
        );
    }
    Ok(())
}

fn cmd_graphs(orch: &Orchestrator) -> Result<()> {
    let graphs = orch.list_graphs();
    if graphs.is_empty() {
        println!("No conversations yet.");
        return Ok(());
    }

    println!("  {:<10} {:<40} {:>6} {:>5}", "ID", "Title", "Blocks", "Msgs");
    println!("{}", "-".repeat(67));
    for g in &graphs {
        let marker = if g.is_current { "*" } else { " " };
        println!(
            "{marker} {:<10} {:<40} {:>6} {:>5}",
            short_id(&g.graph_id),
            truncate(&g.title, 40),
            g.block_count,
            g.message_count
        );
    }
    Ok(())
}

fn cmd_switch(orch: &mut Orchestrator, prefix: &str) -> Result<()> {
    let id = resolve_block(orch, prefix)?;
    match orch.switch_block(&id)? {
        Some(block) => println!("Switched to block: {}", block.label()),
        None => bail!("block not found: {prefix}"),
    }
    Ok(())
}

fn cmd_switch_graph(orch: &mut Orchestrator, prefix: &str) -> Result<()> {
    let id = resolve_graph(orch, prefix)?;
    match orch.switch_graph(&id)? {
        Some(summary) => println!("Switched to conversation: {}", summary.title),
        None => bail!("graph not found: {prefix}"),
    }
    Ok(())
}

fn cmd_delete(orch: &mut Orchestrator, prefix: &str) -> Result<()> {
    let id = resolve_block(orch, prefix)?;
    let removed = orch.delete_block(&id)?;
    println!("Deleted {removed} block(s).");
    Ok(())
}

fn cmd_export(orch: &Orchestrator, viz: bool) -> Result<()> {
    let json = if viz {
        orch.visualize().map(|v| serde_json::to_string_pretty(&v)).transpose()?
    } else {
        orch.export_graph()?
            .map(|v| serde_json::to_string_pretty(&v))
            .transpose()?
    };
    match json {
        Some(text) => println!("{text}"),
        None => bail!("no active conversation"),
    }
    Ok(())
}

fn cmd_clear(orch: &mut Orchestrator, yes: bool) -> Result<()> {
    if !yes && !confirm("Delete every conversation? [y/N] ")? {
        println!("Aborted.");
        return Ok(());
    }
    orch.clear()?;
    println!("All conversations deleted.");
    Ok(())
}

fn cmd_config(cfg: &Config, cli_path: Option<PathBuf>) -> Result<()> {
    println!("Config: {}", config::show_config_path());
    println!();
    println!("[store]");
    println!("  backend = {:?}", cfg.store.backend);
    println!("  path = {}", store_path(cfg, cli_path).display());
    println!();
    println!("[engine]");
    let t = &cfg.engine.thresholds;
    println!("  continue_threshold = {}", t.continue_threshold);
    println!("  deepen_threshold = {}", t.deepen_threshold);
    println!("  tangent_threshold = {}", t.tangent_threshold);
    println!("  context_window = {}", cfg.engine.context_window);
    println!("  auto_summarize_after = {}", cfg.engine.auto_summarize_after);
    println!("  classification_failure = {:?}", cfg.engine.classification_failure);
    println!("  summary_failure = {:?}", cfg.engine.summary_failure);
    println!();
    println!("[llm]");
    println!("  base_url = {}", cfg.llm.base_url);
    println!("  model = {}", cfg.llm.model);
    let key_state = if std::env::var(&cfg.llm.api_key_env).is_ok() {
        "set"
    } else {
        "not set"
    };
    println!("  api_key_env = {} ({key_state})", cfg.llm.api_key_env);
    println!("  temperature = {}", cfg.llm.temperature);
    println!("  max_tokens = {}", cfg.llm.max_tokens);
    println!("  timeout_secs = {}", cfg.llm.timeout_secs);
    println!();
    println!("[embeddings]");
    println!("  provider = {:?}", cfg.embeddings.provider);
    println!("  model = {}", cfg.embeddings.model());
    if let Some(url) = &cfg.embeddings.base_url {
        println!("  base_url = {url}");
    }
    if let Err(e) = cfg.engine.validate() {
        println!();
        println!("warning: {e}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Interactive loop
// ---------------------------------------------------------------------------

const CHAT_HELP: &str = "\
Commands:
  /new <message>        start a new conversation
  /map                  show the block tree
  /blocks               list blocks
  /switch <block>       move to a block
  /graphs               list conversations
  /switch-graph <graph> move to a conversation
  /delete <block>       delete a block and its sub-blocks
  /clear                delete every conversation
  /help                 show this help
  /exit                 quit
Anything else is sent as a message.";

fn cmd_chat(orch: &mut Orchestrator) -> Result<()> {
    println!("mindmap chat. Type /help for commands.");
    if let Some(graph) = orch.current_graph() {
        println!("Resuming: {}", graph.title());
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("\n> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let (cmd, arg) = match input.split_once(char::is_whitespace) {
            Some((c, a)) => (c, a.trim()),
            None => (input, ""),
        };

        let result = match cmd {
            "/exit" | "/quit" => break,
            "/help" => {
                println!("{CHAT_HELP}");
                Ok(())
            }
            "/new" if arg.is_empty() => Err(anyhow::anyhow!("usage: /new <message>")),
            "/new" => cmd_say(orch, arg, true),
            "/map" => cmd_map(orch),
            "/blocks" => cmd_blocks(orch),
            "/graphs" => cmd_graphs(orch),
            "/switch" => cmd_switch(orch, arg),
            "/switch-graph" => cmd_switch_graph(orch, arg),
            "/delete" => cmd_delete(orch, arg),
            "/clear" => cmd_clear(orch, false),
            c if c.starts_with('/') => Err(anyhow::anyhow!("unknown command {c}, try /help")),
            _ => cmd_say(orch, input, false),
        };
        if let Err(e) = result {
            eprintln!("Error: {e:#}");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn resolve_block(orch: &Orchestrator, prefix: &str) -> Result<String> {
    let ids: Vec<&str> = orch.list_blocks().into_iter().map(|b| b.id.as_str()).collect();
    resolve_prefix(&ids, prefix, "block")
}

fn resolve_graph(orch: &Orchestrator, prefix: &str) -> Result<String> {
    let summaries = orch.list_graphs();
    let ids: Vec<&str> = summaries.iter().map(|g| g.graph_id.as_str()).collect();
    resolve_prefix(&ids, prefix, "graph")
}

/// Exact match first, then a unique case-insensitive prefix.
fn resolve_prefix(ids: &[&str], prefix: &str, kind: &str) -> Result<String> {
    if prefix.is_empty() {
        bail!("missing {kind} id");
    }
    if let Some(id) = ids.iter().find(|id| **id == prefix) {
        return Ok(id.to_string());
    }
    let needle = prefix.to_ascii_uppercase();
    let matches: Vec<&&str> = ids
        .iter()
        .filter(|id| id.to_ascii_uppercase().starts_with(&needle))
        .collect();
    match matches.as_slice() {
        [one] => Ok(one.to_string()),
        [] => bail!("{kind} not found: {prefix}"),
        many => bail!("{kind} id {prefix} is ambiguous ({} matches)", many.len()),
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question}");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
