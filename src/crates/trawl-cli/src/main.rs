//! # trawl
//!
//! Command-line entry point: compile a source program into a graph file,
//! or load a graph file and run it.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use trawl_core::{driver, io, planner, Globals, Msg, Node};

#[derive(Parser)]
#[command(name = "trawl")]
#[command(about = "trawl - a declarative web scraping language", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source program, plan fan-outs and write a graph file
    Compile {
        /// Path to the source program
        source: PathBuf,

        /// Path of the graph file to write
        graph: PathBuf,

        /// Total concurrency budget distributed across loops
        max_concurrent: i64,
    },

    /// Load a graph file and execute it
    Run {
        /// Path to a compiled graph file
        graph: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Commands::Compile {
            source,
            graph,
            max_concurrent,
        } => compile(&source, &graph, max_concurrent),
        Commands::Run { graph } => run(&graph).await,
    }
}

fn compile(source: &PathBuf, graph: &PathBuf, max_concurrent: i64) -> Result<()> {
    let code = std::fs::read_to_string(source)
        .with_context(|| format!("reading source file {}", source.display()))?;

    let globals = Globals::new();
    let result = trawl_lang::compile_source(&globals, &code)
        .with_context(|| format!("compiling {}", source.display()))?;
    globals.set_result_id(result.id());

    let fanouts = planner::set_nodes_fan_out(&result, max_concurrent);
    tracing::debug!(?fanouts, max_concurrent, "planned loop fan-outs");

    let file = File::create(graph)
        .with_context(|| format!("creating graph file {}", graph.display()))?;
    io::write_graph(BufWriter::new(file), &globals)
        .with_context(|| format!("writing graph file {}", graph.display()))?;
    Ok(())
}

async fn run(graph: &PathBuf) -> Result<()> {
    let file = File::open(graph)
        .with_context(|| format!("opening graph file {}", graph.display()))?;
    let globals = io::read_graph(BufReader::new(file))
        .with_context(|| format!("reading graph file {}", graph.display()))?;

    let mut rx = driver::attach_result(&globals).context("attaching result channel")?;
    driver::start(&globals);

    match rx.recv().await {
        None => bail!("graph finished without producing a result"),
        Some(Msg::Error(e)) => bail!("run failed: {}", e.error),
        Some(Msg::Value(v)) => println!("{}", v.data),
        Some(Msg::Stream(first)) => {
            let expected = first.len.product();
            println!("{}", first.data);
            let mut received = 1;
            while received < expected {
                match rx.recv().await {
                    Some(Msg::Stream(s)) => {
                        println!("{}", s.data);
                        received += 1;
                    }
                    Some(Msg::Error(e)) => bail!("run failed: {}", e.error),
                    Some(Msg::Value(v)) => {
                        println!("{}", v.data);
                        received += 1;
                    }
                    None => bail!("stream ended after {received} of {expected} elements"),
                }
            }
        }
    }
    Ok(())
}
