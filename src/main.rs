//! docshelf - a personal document store over a plain directory tree

mod daemon;
mod protocol;
mod rate_limit;
mod store;

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use crate::protocol::{ItemEntry, TreeNode};
use crate::store::config::StoreConfig;
use crate::store::DocumentStore;

#[derive(Parser)]
#[command(name = "docshelf", version, about = "Cabinets, shelves, binders and folders over a directory tree")]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct StoreArgs {
    /// Store root directory
    #[arg(long, global = true, env = "DOCSHELF_ROOT")]
    root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the store over WebSocket (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = daemon::DEFAULT_PORT, env = "DOCSHELF_PORT")]
        port: u16,

        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        bind: IpAddr,
    },
    /// Print store statistics
    Stats,
    /// Print the directory skeleton
    Tree {
        /// Levels below the cabinets
        #[arg(short, long)]
        depth: Option<u32>,
    },
    /// Search entry names
    Search {
        query: String,

        /// Only report this type (cabinet, shelf, binder, folder, sub_item, document)
        #[arg(short = 't', long = "type")]
        item_type: Option<String>,

        /// Only report documents with this extension
        #[arg(short, long)]
        ext: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("docshelf=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match cli.store.root {
        Some(root) => StoreConfig::with_root(root),
        None => StoreConfig::default(),
    };
    let store = DocumentStore::new(config);

    match cli.command.unwrap_or(Commands::Serve {
        port: daemon::DEFAULT_PORT,
        bind: IpAddr::from([0, 0, 0, 0]),
    }) {
        Commands::Serve { port, bind } => daemon::run(store, bind, port).await?,
        Commands::Stats => {
            let stats = store.tree().stats().await?;
            println!("{}", store.config().root.display().to_string().bold());
            println!("  {:<12} {}", "cabinets".cyan(), stats.total_cabinets);
            println!("  {:<12} {}", "shelves".cyan(), stats.total_shelves);
            println!("  {:<12} {}", "binders".cyan(), stats.total_binders);
            println!("  {:<12} {}", "folders".cyan(), stats.total_folders);
            println!("  {:<12} {}", "sub-items".cyan(), stats.total_sub_items);
            println!("  {:<12} {}", "documents".cyan(), stats.total_documents);
            println!("  {:<12} {} bytes", "size".cyan(), stats.total_size);
            for (ext, count) in &stats.extensions {
                println!("    {:<10} {}", ext.dimmed(), count);
            }
        }
        Commands::Tree { depth } => {
            let tree = store.tree().build_tree(depth).await?;
            print_tree(&tree, 0);
        }
        Commands::Search {
            query,
            item_type,
            ext,
        } => {
            let hits = store
                .tree()
                .search(&query, item_type.as_deref(), ext.as_deref())
                .await?;
            if hits.is_empty() {
                println!("{}", "No matches".dimmed());
            }
            for hit in &hits {
                print_hit(hit);
            }
        }
    }

    Ok(())
}

fn print_tree(nodes: &[TreeNode], indent: usize) {
    for node in nodes {
        println!(
            "{}{} {}",
            "  ".repeat(indent),
            node.name.bold(),
            format!("({})", node.item_type).dimmed()
        );
        print_tree(&node.children, indent + 1);
    }
}

fn print_hit(hit: &ItemEntry) {
    println!(
        "{:<10} {}",
        hit.item_type.to_string().cyan(),
        hit.path
    );
}
