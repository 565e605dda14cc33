use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use opsdeck::{
    actors::{history::HistoryHandle, monitor::MonitorHandle, scheduler::SchedulerHandle},
    backup::BackupOrchestrator,
    config::read_config_file,
    monitors::system::SysinfoSource,
    notify::NotificationDispatcher,
};
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("opsdeck", LevelFilter::TRACE),
        ("daemon", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;
    let channels = config.notifications.channels()?;

    let dispatcher = Arc::new(NotificationDispatcher::new());
    let source = Arc::new(SysinfoSource);

    let monitor = MonitorHandle::spawn(
        source.clone(),
        dispatcher.clone(),
        Duration::from_secs(config.evaluation_interval),
    );
    monitor.set_channels(channels).await?;
    for rule in config.rules {
        info!("registering alert rule: {} ({})", rule.name, rule.id);
        monitor.add_rule(rule).await?;
    }

    let history = HistoryHandle::spawn(source, Duration::from_secs(config.sampling_interval));

    let scheduler = SchedulerHandle::spawn(BackupOrchestrator::new(), dispatcher);
    for schedule in config.schedules {
        if let Err(e) = scheduler
            .add_schedule(schedule.id.clone(), schedule.cron, schedule.backup)
            .await?
        {
            error!("skipping backup schedule {}: {e}", schedule.id);
        }
    }

    info!("opsdeck daemon running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    monitor.shutdown().await?;
    history.shutdown().await?;
    scheduler.shutdown().await?;

    Ok(())
}
