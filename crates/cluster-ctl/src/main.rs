//! cluster-ctl — command-line interface for the storage cluster.

use anyhow::{Context, Result};

mod cmd;

const DEFAULT_COORDINATOR: &str = "127.0.0.1:5000";

fn print_usage() {
    println!("Usage: cluster-ctl [--coordinator <host:port>] <command>");
    println!();
    println!("Commands");
    println!("  status                              Cluster-wide health summary");
    println!("  nodes                               List registered storage nodes");
    println!("  upload <path> [--replicas <n>]       Upload a local file");
    println!("  download <file_id> <out_path>        Download a file by id");
    println!();
    println!(
        "Options:\n  --coordinator <host:port>    Coordinator address (default: {})",
        DEFAULT_COORDINATOR
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut coordinator = DEFAULT_COORDINATOR.to_string();
    let mut remaining: Vec<String> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--coordinator" {
            i += 1;
            coordinator = args.get(i).context("--coordinator requires a value")?.clone();
        } else {
            remaining.push(args[i].clone());
        }
        i += 1;
    }

    let remaining_refs: Vec<&str> = remaining.iter().map(|s| s.as_str()).collect();

    if remaining_refs.first() == Some(&"upload") && remaining_refs.len() >= 2 {
        let path = remaining_refs[1];
        let mut replicas: Option<u32> = None;
        let mut i = 2;
        while i < remaining_refs.len() {
            match remaining_refs[i] {
                "--replicas" => {
                    i += 1;
                    replicas = Some(
                        remaining_refs
                            .get(i)
                            .context("--replicas requires a value")?
                            .parse()
                            .context("--replicas must be a number")?,
                    );
                }
                other => anyhow::bail!("unknown option: {other}"),
            }
            i += 1;
        }
        return cmd::upload::cmd_upload(&coordinator, path, replicas).await;
    }

    match remaining_refs.as_slice() {
        ["status"] | [] => cmd::status::cmd_status(&coordinator).await,
        ["nodes"] => cmd::nodes::cmd_nodes(&coordinator).await,
        ["download", file_id, out_path] => cmd::download::cmd_download(&coordinator, file_id, out_path).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
