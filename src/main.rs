// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use wishlist::broker::{LocalClient, SshClient};
use wishlist::cli::{Cli, Commands};
use wishlist::config::loader;
use wishlist::{listing, server};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("wishlist: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Man) => {
            let man = clap_mangen::Man::new(Cli::command());
            let mut out = Vec::new();
            man.render(&mut out).context("could not generate man pages")?;
            use std::io::Write;
            std::io::stdout().write_all(&out)?;
            Ok(())
        }
        Some(Commands::Serve { refresh_interval }) => {
            init_logging(cli.verbose);
            serve(cli.config.as_deref(), refresh_interval).await
        }
        None => {
            // The terminal belongs to the list; logs go to a file.
            init_file_logging(cli.verbose);
            local(cli.config.as_deref(), cli.name.as_deref()).await
        }
    }
}

async fn serve(config_path: Option<&std::path::Path>, refresh_interval: u64) -> Result<()> {
    let (mut config, path) = loader::load(config_path, &[])?;

    if refresh_interval > 0 {
        tracing::info!(interval = refresh_interval, "endpoint refresh enabled");
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        config.endpoint_channel = Some(rx);

        let path = path.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(refresh_interval));
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                tracing::info!("refreshing endpoints");
                match loader::load_file(&path, &[]) {
                    Ok(reloaded) => {
                        if tx.send(reloaded.endpoints).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "could not reload configuration");
                    }
                }
            }
        });
    }

    server::serve(config).await
}

async fn local(config_path: Option<&std::path::Path>, name: Option<&str>) -> Result<()> {
    let (config, _) = loader::load(config_path, &[])?;

    match name {
        // either no args or the literal `list` opens the list
        None | Some("list") => listing::local::run(config.endpoints).await,
        Some(name) => {
            let endpoint = config
                .endpoints
                .iter()
                .find(|e| e.is_valid() && e.name == name)
                .with_context(|| format!("invalid endpoint name: {name:?}"))?;

            let mut command = LocalClient::new().for_endpoint(endpoint);
            command.run().await.context("connection failed")
        }
    }
}

fn init_logging(verbosity: u8) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbosity))
        .with_target(false)
        .init();
}

/// Local mode logs to `<cache>/wishlist.log` so the TUI owns the terminal.
fn init_file_logging(verbosity: u8) {
    let Some(dirs) = directories::BaseDirs::new() else {
        return;
    };
    let path = dirs.cache_dir().join("wishlist.log");
    let Ok(file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    else {
        return;
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbosity.max(1)))
        .with_writer(file)
        .with_ansi(false)
        .init();
}

fn env_filter(verbosity: u8) -> EnvFilter {
    match verbosity {
        0 => EnvFilter::new("wishlist=warn"),
        1 => EnvFilter::new("wishlist=info"),
        2 => EnvFilter::new("wishlist=debug"),
        _ => EnvFilter::new("wishlist=trace"),
    }
}
