// Copyright 2026 Daniel Pelikan
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

//! btle-remote command line tool

use anyhow::{bail, Context, Result};
use clap::{Parser as _, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use btle_remote::config::Config;
use btle_remote::protocol::Parser;

#[derive(clap::Parser, Debug)]
#[command(name = "btle-remote", version)]
#[command(about = "Send 3-letter commands to a BLE serial peripheral", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Parse a command line and print its structure
    Parse {
        line: String,
    },
    /// Connect, send one command and optionally wait for the reply
    Send {
        /// Peripheral address, overrides `device.address`
        #[arg(long)]
        address: Option<String>,

        /// Wait for one reply line and print it
        #[arg(long)]
        reply: bool,

        line: String,
    },
    /// Write the effective configuration to the config file
    InitConfig,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("btle_remote=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load_from(&config_path)?;

    match cli.command {
        Action::Parse { line } => {
            let command = Parser::new()
                .try_parse(&line)
                .with_context(|| format!("cannot parse {:?}", line))?;
            println!("code:  {}", command.code());
            println!("shape: {:?}", command.shape());
            println!("wire:  {}", command);
        }
        Action::Send {
            address,
            reply,
            line,
        } => {
            let command = Parser::new()
                .try_parse(&line)
                .with_context(|| format!("cannot parse {:?}", line))?;
            let Some(address) = address.or_else(|| config.device.address.clone()) else {
                bail!("no peripheral address given and none configured");
            };
            send(&config, &address, &command, reply)?;
        }
        Action::InitConfig => {
            config.save_to(&config_path)?;
            info!("Configuration written to {}", config_path.display());
        }
    }
    Ok(())
}

#[cfg(feature = "bluez")]
fn send(
    config: &Config,
    address: &str,
    command: &btle_remote::Command,
    reply: bool,
) -> Result<()> {
    use btle_remote::bluetooth::{BluerTransport, SessionManager};
    use std::sync::Arc;

    let session = SessionManager::new(Arc::new(BluerTransport::new()), config.session.clone())?;
    session.connect_to(address, config.device.connect_timeout())?;
    session.send_command(command, config.device.send_timeout())?;
    info!("Sent {}", command);

    if reply {
        let answer = session.read_line(config.device.read_timeout())?;
        println!("{}", answer);
    }
    session.disconnect();
    Ok(())
}

#[cfg(not(feature = "bluez"))]
fn send(_: &Config, _: &str, _: &btle_remote::Command, _: bool) -> Result<()> {
    bail!("built without BlueZ support, rebuild with `--features bluez`")
}
