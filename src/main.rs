use clap::Parser;
use dotenv::dotenv;
use log::{debug, error, info};
use pcap_loader::cli::{Cli, Command};
use pcap_loader::core::error::{LoaderError, LoaderResult};
use pcap_loader::core::shutdown::shutdown_channel;
use pcap_loader::core::{Configuration, IngestPipeline};
use pcap_loader::ingest::RunSummary;
use pcap_loader::setup_logger::setup_logger;
use pcap_loader::storage::{RecordStore, TimescaleStore};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    // .env は任意
    dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = setup_logger(cli.global.log_file.as_deref()) {
        eprintln!("ロガーの初期化に失敗しました: {}", e);
        return ExitCode::from(1);
    }

    match run(cli).await {
        Ok(summary) => {
            println!("{}", summary);
            if summary.cancelled {
                ExitCode::from(LoaderError::Cancelled.exit_code())
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> LoaderResult<RunSummary> {
    let Command::Pcap(pcap) = cli.command;
    let config = Configuration::from_cli(&cli.global, &pcap)?;
    match serde_json::to_string(&config) {
        Ok(json) => debug!("設定: {}", json),
        Err(e) => debug!("設定を表示できません: {}", e),
    }

    // データベースへの接続
    let store = TimescaleStore::connect(&config.database).await?;
    let store: Arc<dyn RecordStore> = Arc::new(store);

    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("中断要求を受け付けました。書き込み中のレコードを待って終了します");
            trigger.trigger();
        }
    });

    let pipeline = IngestPipeline::new(store, config.ingest);
    pipeline.run(pcap.filenames, shutdown).await
}
