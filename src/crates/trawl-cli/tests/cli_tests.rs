//! Integration tests for the compile-then-run pipeline the CLI drives:
//! source file → compiled graph file → loaded registry → final result.

use std::fs;
use tempfile::TempDir;
use trawl_core::{driver, io, planner, Globals, Node, Outcome, Value};

fn compile_to_file(dir: &TempDir, source: &str, budget: i64) -> std::path::PathBuf {
    let source_path = dir.path().join("program.trawl");
    let graph_path = dir.path().join("program.graph");
    fs::write(&source_path, source).expect("write source");

    let code = fs::read_to_string(&source_path).expect("read source");
    let globals = Globals::new();
    let result = trawl_lang::compile_source(&globals, &code).expect("compile");
    globals.set_result_id(result.id());
    planner::set_nodes_fan_out(&result, budget);

    let file = fs::File::create(&graph_path).expect("create graph file");
    io::write_graph(std::io::BufWriter::new(file), &globals).expect("write graph");
    graph_path
}

async fn run_from_file(graph_path: &std::path::Path) -> Outcome {
    let file = fs::File::open(graph_path).expect("open graph file");
    let globals = io::read_graph(std::io::BufReader::new(file)).expect("read graph");
    driver::execute(&globals).await.expect("execute")
}

#[tokio::test]
async fn compile_and_run_a_value_program() {
    let dir = TempDir::new().unwrap();
    let graph = compile_to_file(&dir, "(+ 2 3)", 20);
    assert_eq!(run_from_file(&graph).await, Outcome::Value(Value::Int(5)));
}

#[tokio::test]
async fn compile_and_run_a_loop_program() {
    let dir = TempDir::new().unwrap();
    let graph = compile_to_file(&dir, "(collect (for i (.. 1 4) (* i i)))", 20);
    assert_eq!(
        run_from_file(&graph).await,
        Outcome::Value(Value::List(vec![
            Value::Int(1),
            Value::Int(4),
            Value::Int(9)
        ]))
    );
}

#[tokio::test]
async fn malformed_source_does_not_produce_a_graph() {
    let globals = Globals::new();
    assert!(trawl_lang::compile_source(&globals, "(unknown 1 2)").is_err());
    assert!(trawl_lang::compile_source(&globals, "(+ 1").is_err());
}

#[tokio::test]
async fn truncated_graph_file_fails_to_load() {
    let dir = TempDir::new().unwrap();
    let graph = compile_to_file(&dir, "(+ 2 3)", 20);
    let bytes = fs::read(&graph).unwrap();
    let truncated = &bytes[..bytes.len() / 2];
    assert!(io::read_graph(truncated).is_err());
}
