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

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "wishlist",
    version,
    about = "The SSH Directory",
    long_about = "Wishlist is an SSH directory.\n\n\
        It provides a TUI for your ~/.ssh/config or another config file, \
        which can be in either the SSH configuration format or YAML.\n\n\
        It's also possible to serve the TUI over SSH using the serve command."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Endpoint name to connect to directly, or `list` to open the list.
    pub name: Option<String>,

    #[arg(
        short = 'c',
        long,
        help = "Path to the config file to use. Defaults to, in order of preference: \
                .wishlist/config.yaml, .wishlist/config.yml, .wishlist/config, \
                $XDG_CONFIG_HOME/wishlist.{yaml,yml,}, ~/.ssh/config, /etc/ssh/ssh_config"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        short = 'v',
        long,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Serve the TUI over SSH.", aliases = ["server", "s"])]
    Serve {
        #[arg(
            long = "endpoints.refresh.interval",
            default_value = "0",
            help = "Interval in seconds to refresh the endpoints, with 0 disabling it"
        )]
        refresh_interval: u64,
    },

    #[command(about = "generate man pages", hide = true)]
    Man,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_args_opens_list() {
        let cli = Cli::parse_from(["wishlist"]);
        assert!(cli.command.is_none());
        assert!(cli.name.is_none());
    }

    #[test]
    fn test_name_argument() {
        let cli = Cli::parse_from(["wishlist", "bar"]);
        assert_eq!(cli.name.as_deref(), Some("bar"));
    }

    #[test]
    fn test_serve_subcommand() {
        let cli = Cli::parse_from(["wishlist", "serve"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Serve { refresh_interval: 0 })
        ));

        let cli = Cli::parse_from([
            "wishlist",
            "serve",
            "--endpoints.refresh.interval",
            "30",
        ]);
        assert!(matches!(
            cli.command,
            Some(Commands::Serve { refresh_interval: 30 })
        ));
    }

    #[test]
    fn test_serve_aliases() {
        for alias in ["server", "s"] {
            let cli = Cli::parse_from(["wishlist", alias]);
            assert!(matches!(cli.command, Some(Commands::Serve { .. })));
        }
    }

    #[test]
    fn test_config_flag() {
        let cli = Cli::parse_from(["wishlist", "-c", "/tmp/config.yaml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/config.yaml")));
    }
}
