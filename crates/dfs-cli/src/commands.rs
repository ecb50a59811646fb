use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::json;
use tokio::time::{sleep, timeout};
use tracing::warn;

use dfs_server::{FileServer, Replication, ServerConfig};
use dfs_store::Store;

use crate::cli::*;

const POLL: Duration = Duration::from_millis(50);

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Serve(args) => cmd_serve(args, format).await,
        Command::Put(args) => cmd_put(args, format).await,
        Command::Get(args) => cmd_get(args, format).await,
        Command::Demo(args) => cmd_demo(args, format).await,
    }
}

/// Load `--config` if given, then apply flag overrides.
fn node_config(args: NodeArgs) -> anyhow::Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if !args.bootstrap.is_empty() {
        config.bootstrap = args.bootstrap;
    }
    if let Some(root) = args.root {
        config.storage_root = Some(root);
    }
    if let Some(transform) = args.transform {
        config.path_transform = transform;
    }
    if let Some(codec) = args.codec {
        config.codec = codec;
    }
    if let Some(handshake) = args.handshake {
        config.handshake = handshake;
    }
    config.validate()?;
    Ok(config)
}

async fn wait_for_peers(server: &FileServer, wanted: usize, limit: Duration) -> bool {
    timeout(limit, async {
        while server.peer_count() < wanted {
            sleep(POLL).await;
        }
    })
    .await
    .is_ok()
}

async fn cmd_serve(args: ServeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let server = FileServer::new(node_config(args.node)?)?;
    let addr = server.start().await?;
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "listening": addr.to_string(), "root": server.store().root(), "peers": server.peers() })
        ),
        OutputFormat::Text => {
            println!("{} DFS node listening on {}", "✓".green().bold(), addr.to_string().bold());
            println!("  Root: {}", server.store().root().display());
            println!("  Peers: {}", server.peer_count());
        }
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    server.stop().await;
    if format == OutputFormat::Text {
        println!("{} Stopped.", "✓".green());
    }
    Ok(())
}

async fn cmd_put(args: PutArgs, format: OutputFormat) -> anyhow::Result<()> {
    let server = FileServer::new(node_config(args.node)?)?;
    server.start().await?;

    let wanted = server.config().bootstrap.len();
    if !wait_for_peers(&server, wanted, Duration::from_millis(args.peer_wait_ms)).await {
        warn!(wanted, connected = server.peer_count(), "not every bootstrap peer registered");
    }

    let file = tokio::fs::File::open(&args.file)
        .await
        .with_context(|| format!("cannot open {}", args.file.display()))?;
    let replication = server.store_and_replicate(&args.key, file).await?;
    sleep(Duration::from_millis(args.grace_ms)).await;
    server.stop().await;

    print_replication(&replication, format)
}

fn print_replication(replication: &Replication, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(replication)?),
        OutputFormat::Text => {
            println!(
                "{} Stored {} ({} bytes)",
                "✓".green().bold(),
                replication.key.yellow(),
                replication.size
            );
            for peer in &replication.delivered {
                println!("  {} {}", "sent:".green(), peer);
            }
            for peer in &replication.failed {
                println!("  {} {}", "failed:".red(), peer);
            }
        }
    }
    Ok(())
}

async fn cmd_get(args: GetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = Store::new(&args.root, args.transform.build());
    let mut object = store
        .read(&args.key)
        .await
        .with_context(|| format!("{} in {}", args.key, args.root.display()))?;

    match &args.output {
        Some(path) => {
            let mut out = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("cannot create {}", path.display()))?;
            let size = tokio::io::copy(&mut object, &mut out).await?;
            match format {
                OutputFormat::Json => println!(
                    "{}",
                    json!({ "key": args.key, "size": size, "location": store.locate(&args.key).to_string(), "output": path })
                ),
                OutputFormat::Text => println!(
                    "{} Wrote {} ({} bytes) to {}",
                    "✓".green().bold(),
                    args.key.yellow(),
                    size,
                    path.display()
                ),
            }
        }
        None => {
            tokio::io::copy(&mut object, &mut tokio::io::stdout()).await?;
        }
    }
    Ok(())
}

async fn cmd_demo(args: DemoArgs, format: OutputFormat) -> anyhow::Result<()> {
    let a = Arc::new(FileServer::new(
        ServerConfig::new("127.0.0.1:0").with_storage_root(args.dir.join("a")),
    )?);
    let a_addr = a.start().await?;

    let b = Arc::new(FileServer::new(
        ServerConfig::new("127.0.0.1:0")
            .with_storage_root(args.dir.join("b"))
            .with_bootstrap([a_addr.to_string()]),
    )?);
    let b_addr = b.start().await?;

    if !wait_for_peers(&a, 1, Duration::from_secs(5)).await {
        bail!("node {b_addr} never registered with {a_addr}");
    }

    let replication = b.store_and_replicate(&args.key, args.data.as_bytes()).await?;

    let expected = args.data.as_bytes();
    let received = timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(data) = a.store().read_to_vec(&args.key).await {
                if data == expected {
                    return data;
                }
            }
            sleep(POLL).await;
        }
    })
    .await
    .with_context(|| format!("{} never arrived at {a_addr}", args.key))?;

    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({
                "writer": b_addr.to_string(),
                "reader": a_addr.to_string(),
                "replication": replication,
                "received": String::from_utf8_lossy(&received),
            })
        ),
        OutputFormat::Text => {
            println!("{} {} stored {} on {}", "✓".green().bold(), "writer".bold(), args.key.yellow(), b_addr);
            println!("{} {} read it back from {}", "✓".green().bold(), "reader".bold(), a_addr);
            println!("  Location: {}", a.store().locate(&args.key).to_string().cyan());
            println!("  Content: {}", String::from_utf8_lossy(&received));
        }
    }

    b.stop().await;
    a.stop().await;
    if !args.keep {
        a.store().clear().await?;
        b.store().clear().await?;
    }
    Ok(())
}
