// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{ArgAction, CommandFactory, FromArgMatches, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "hpcbotd",
    version,
    about = "Runs chat-submitted calculations on SLURM clusters and reports the results",
    long_about = None,
    after_help = "Configuration precedence: defaults < config file < command-line flags.\n\
Config path precedence: defaults < HPCBOT_CONFIG_PATH < command-line flags.\n\
If --config is omitted, hpcbotd tries HPCBOT_CONFIG_PATH, then the default config file location; missing default config is OK.\n\
Paths in the config file are resolved relative to the config file directory; paths passed as flags are resolved relative to the current working directory."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        global = true,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, hpcbotd uses HPCBOT_CONFIG_PATH if set, otherwise the default config file location if available."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Path to the SQLite database file. Overrides `database_path` from the config file."
    )]
    pub database_path: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Local working directory for calculation folders. Overrides `download_path` from the config file."
    )]
    pub download_path: Option<PathBuf>,
    #[arg(
        short,
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Enable debug logging. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the manager loop until interrupted (default).
    Run {
        #[arg(
            long,
            value_name = "SECS",
            help = "Fixed delay between cycles. Overrides `[polling]` from the config file."
        )]
        interval_secs: Option<u64>,
        #[arg(long, action = ArgAction::SetTrue, help = "Run a single cycle and exit.")]
        once: bool,
    },
    /// Record a calculation the way the chat front-end does and print the
    /// path its input file belongs at. With `--input`, the file is copied
    /// there as well.
    Submit {
        #[arg(long, value_name = "ID")]
        user: i64,
        #[arg(long, value_name = "NAME", help = "Input file name, e.g. water.gjf")]
        file: String,
        #[arg(long, value_name = "CMD", help = "Free-form command line, e.g. 'orca {}'")]
        command: Option<String>,
        #[arg(long, value_name = "PATH", help = "Local file to use as the input")]
        input: Option<PathBuf>,
    },
    /// Create or update a user.
    AddUser {
        #[arg(long, value_name = "ID")]
        id: i64,
        #[arg(long, value_name = "N", default_value_t = 10)]
        limit: i64,
        #[arg(long, action = ArgAction::SetTrue)]
        blocked: bool,
        #[arg(long, value_name = "ID", allow_hyphen_values = true)]
        chat_id: Option<i64>,
    },
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
}

impl Opts {
    pub fn command_or_default(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run {
            interval_secs: None,
            once: false,
        })
    }
}

pub fn cli_command() -> clap::Command {
    Opts::command()
}

pub fn parse_opts() -> ParsedOpts {
    let matches = cli_command().get_matches();
    from_matches(&matches)
}

fn from_matches(matches: &clap::ArgMatches) -> ParsedOpts {
    let verbose_override = if matches.get_flag("verbose") {
        Some(true)
    } else {
        None
    };
    let opts = Opts::from_arg_matches(matches).unwrap_or_else(|err| err.exit());
    ParsedOpts {
        opts,
        verbose_override,
    }
}
