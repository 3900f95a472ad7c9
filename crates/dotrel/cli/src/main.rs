// Dotrel
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Dotrel CLI Tool
//!
//! Command-line interface for the Dotrel relational engine: rewriting
//! relational algebra expressions and demonstrating concurrent transaction
//! execution over an in-memory block directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dotrel_core::query::optimizer::{MemorySchemaProvider, ProjectionRewrite, Token, render};
use dotrel_core::transaction_engine::{
    Command, CommandKind, EventKind, MemoryBlockDirectory, NoopExecutor, TransactionConfig,
    TransactionEvent, TransactionSystem,
};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "dotrel")]
#[command(about = "Dotrel - Relational Engine CLI")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite a relational algebra expression with the projection rules
    Optimize {
        /// JSON file holding the expression token list
        expression: PathBuf,
        /// JSON file mapping table names to their attribute lists
        #[arg(long, short = 's')]
        schema: PathBuf,
        /// Print the result as readable text instead of JSON
        #[arg(long)]
        pretty: bool,
    },
    /// Run concurrent transactions over an in-memory block directory
    Demo {
        /// Number of transactions to submit
        #[arg(long, default_value_t = 8)]
        transactions: usize,
        /// Lock wait timeout in milliseconds (waits forever when absent)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Optimize {
            expression,
            schema,
            pretty,
        } => handle_optimize(&expression, &schema, pretty),
        Commands::Demo {
            transactions,
            timeout_ms,
        } => handle_demo(transactions, timeout_ms),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn handle_optimize(expression: &Path, schema: &Path, pretty: bool) -> anyhow::Result<()> {
    let tokens: Vec<Token> = serde_json::from_str(&std::fs::read_to_string(expression)?)?;
    let tables: HashMap<String, Vec<String>> =
        serde_json::from_str(&std::fs::read_to_string(schema)?)?;
    let catalog = MemorySchemaProvider::from_map(tables);

    let rewriter = ProjectionRewrite::new(&catalog);
    let optimized = rewriter.rewrite(&tokens);
    info!(
        "Rewrote expression of {} tokens into {} tokens",
        tokens.len(),
        optimized.len()
    );

    if pretty {
        println!("{}", render(&optimized));
    } else {
        println!("{}", serde_json::to_string_pretty(&optimized)?);
    }
    Ok(())
}

fn handle_demo(transactions: usize, timeout_ms: Option<u64>) -> anyhow::Result<()> {
    let mut directory = MemoryBlockDirectory::new();
    directory.insert("student", 100, 108);
    directory.insert("professor", 200, 204);

    let config = TransactionConfig {
        lock_wait_timeout: timeout_ms.map(Duration::from_millis),
        ..TransactionConfig::default()
    };
    let system = TransactionSystem::new(config, Arc::new(directory), Arc::new(NoopExecutor));

    for kind in [EventKind::TransactionFinished, EventKind::AllTransactionsFinished] {
        system.events().subscribe(
            kind,
            Arc::new(|event: &TransactionEvent| {
                info!("Event: {:?}", event);
            }),
        );
    }

    let submissions: Vec<_> = (0..transactions)
        .map(|i| {
            let (table, kind) = match i % 4 {
                0 => ("student", CommandKind::Select),
                1 => ("student", CommandKind::Update),
                2 => ("professor", CommandKind::Select),
                _ => ("professor", CommandKind::Insert),
            };
            system.submit(vec![Command::new(table, kind)])
        })
        .collect();

    for submission in submissions {
        let id = submission.id();
        let outcome = submission.wait();
        println!("Transaction {id}: {outcome:?}");
    }

    system.await_quiescence();
    let stats = system.locks().statistics();
    println!(
        "Lock table after quiescence: {} granted, {} waiting, {} live resources",
        stats.granted_requests, stats.waiting_requests, stats.live_resources
    );
    Ok(())
}
