use anyhow::Result;
use modkeeper::{cli, logging, AppConfig, ModManager};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let action = cli::parse_args(&args)?;
    if action.command.is_offline() {
        return cli::run_command_offline(&action);
    }

    let config = AppConfig::load_or_create()?;
    let _log_guard = logging::init_logging(&config.logs_dir(), config.debug_logging)?;
    let mut manager = ModManager::open(&config)?;
    cli::run_command(&config, &mut manager, action).await
}
