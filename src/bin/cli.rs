//! widecol CLI Client
//!
//! Command-line interface for the widecol HTTP API.

use clap::{Parser, Subcommand};
use widecol::http::Client;

/// widecol CLI
#[derive(Parser, Debug)]
#[command(name = "widecol-cli")]
#[command(about = "CLI for the widecol HTTP API")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:8000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the schema and seed the demo partition
    Init {
        /// Secondary ids to seed (two rows each)
        #[arg(short, long)]
        rows: Option<i64>,
    },

    /// Look up several secondary ids at once
    Search {
        /// Ids to look up; random ids when none are given
        ids: Vec<i64>,
    },

    /// Look up every row of one secondary id
    Find {
        /// The id to look up
        id: String,
    },
}

fn target(command: &Commands) -> String {
    match command {
        Commands::Init { rows: Some(rows) } => format!("/init?rows={}", rows),
        Commands::Init { rows: None } => "/init".to_string(),
        Commands::Search { ids } if ids.is_empty() => "/search".to_string(),
        Commands::Search { ids } => format!(
            "/search?ids={}",
            ids.iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(",")
        ),
        Commands::Find { id } => format!("/find/{}", id),
    }
}

fn main() {
    let args = Args::parse();
    let client = Client::new(&args.server);

    match client.get(&target(&args.command)) {
        Ok(response) => {
            println!("{}", response.text());
            if response.status >= 400 {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Request to {} failed: {}", args.server, e);
            std::process::exit(1);
        }
    }
}
