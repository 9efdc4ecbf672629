use std::convert::TryInto;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chaos_inject_engine::handler::rule::{RuleId, RuleKind};
use clap::AppSettings;
use structopt::StructOpt;
use tokio::fs::read_to_string;
use tracing_subscriber::filter::LevelFilter;

use crate::config::Config;
use crate::raw_config::RawConfig;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "chaos-inject",
    about = "Manage the chaos rules of the fault injection engine.",
    global_settings = &[AppSettings::ColoredHelp, AppSettings::VersionlessSubcommands]
)]
pub struct Opt {
    /// path of config file, json or yaml
    #[structopt(short, long, parse(from_os_str))]
    pub config: Option<PathBuf>,

    // The number of occurrences of the `v/verbose` flag
    /// Verbose mode (-v, -vv, -vvv, etc.)
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: u8,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Create a rule acting on requests of a route.
    CreateResponse {
        /// slow, return or raise
        verb: String,
        /// Route name to act on, empty for every route
        route: String,
        #[structopt(flatten)]
        args: RuleArgs,
    },
    /// Create a rule acting on data-access calls.
    CreateAccess {
        /// slow or raise
        verb: String,
        /// The value of the attribute to match, empty for any
        value: String,
        /// The resource attribute to match
        #[structopt(
            long,
            default_value = "app_label",
            possible_values = &["name", "module", "app_label", "class_name"]
        )]
        attribute: String,
        #[structopt(flatten)]
        args: RuleArgs,
    },
    /// List rules.
    List {
        /// Filter by verb
        #[structopt(long)]
        verb: Option<String>,
        /// Filter by rule kind
        #[structopt(long, possible_values = &["response", "access", "db"])]
        kinds: Vec<RuleKind>,
        /// Dump more data
        #[structopt(short, long)]
        more: bool,
        /// Dump excessive data
        #[structopt(short, long)]
        excess: bool,
    },
    /// Dump one rule.
    Dump {
        kind: RuleKind,
        id: RuleId,
        /// Dump more data
        #[structopt(long)]
        more: bool,
        /// Dump excessive data
        #[structopt(long)]
        excess: bool,
    },
    Enable {
        kind: RuleKind,
        id: RuleId,
    },
    Disable {
        kind: RuleKind,
        id: RuleId,
    },
    Delete {
        kind: RuleKind,
        id: RuleId,
    },
    /// Create low probability wildcard rules for some users or groups, or delete them.
    Storm {
        /// The users to have a party for
        #[structopt(long)]
        users: Vec<String>,
        /// The groups to have a party for
        #[structopt(long)]
        groups: Vec<String>,
        /// Probability % of created rules
        #[structopt(long)]
        probability: Option<f64>,
        /// Delete existing storm rules
        #[structopt(long)]
        end: bool,
    },
}

/// Options shared by the create commands.
#[derive(Debug, Clone, Default, StructOpt)]
pub struct RuleArgs {
    /// Config entries of the created rule
    #[structopt(long = "kv", number_of_values = 2, value_names = &["KEY", "VALUE"])]
    pub kv: Vec<String>,

    /// Probability % of the created rule, 100 by default
    #[structopt(long)]
    pub probability: Option<f64>,

    /// Only act on this host
    #[structopt(long, default_value = "")]
    pub on_host: String,

    #[structopt(long)]
    pub users: Vec<String>,

    #[structopt(long)]
    pub groups: Vec<String>,

    /// Create the rule disabled
    #[structopt(long)]
    pub disabled: bool,
}

impl RuleArgs {
    pub fn config_entries(&self) -> Result<Vec<(&str, &str)>> {
        self.kv
            .chunks(2)
            .map(|pair| match pair {
                [key, value] => Ok((key.as_str(), value.as_str())),
                _ => Err(anyhow!("--kv takes a key and a value")),
            })
            .collect()
    }
}

impl Opt {
    pub fn get_level_filter(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::ERROR,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

pub async fn get_config_from_opt(opt: &Opt) -> Result<Config> {
    read_config(opt.config.as_deref()).await
}

pub async fn read_config(path: Option<&Path>) -> Result<Config> {
    match path {
        None => RawConfig::default(),
        Some(path) => {
            let buffer = read_to_string(path)
                .await
                .with_context(|| format!("fail to read config {}", path.display()))?;
            match path.extension().and_then(|ext| ext.to_str()) {
                Some("json") => serde_json::from_str(&buffer)?,
                Some("yaml") | Some("yml") => serde_yaml::from_str(&buffer)?,
                _ => return Err(anyhow!("invalid file extension")),
            }
        }
    }
    .try_into()
}
