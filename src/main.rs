//! anno-vecdb CLI 진입점

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = anno_vecdb::cli::Cli::parse();

    // 로깅 초기화 (--debug면 debug 레벨)
    let level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(anno_vecdb::cli::run(cli))
}
