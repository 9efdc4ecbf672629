use structopt::StructOpt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cmd::command_line::{get_config_from_opt, Opt};
use crate::cmd::execute;

pub mod cmd;
pub mod config;
pub mod raw_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = match Opt::from_args_safe() {
        Err(e) => e.exit(),
        Ok(o) => o,
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(opt.get_level_filter().into()))
        .init();

    let config = get_config_from_opt(&opt).await?;
    let stdout = std::io::stdout();
    let stderr = std::io::stderr();
    execute(opt.command, config, &mut stdout.lock(), &mut stderr.lock())
}
