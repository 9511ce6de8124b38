use replicated_log::{
    DefaultParticipantsFactory, InMemoryLogStore, InProcessNetwork, LogCore, LogPayload, LogStatus, LogTerm,
    LogTermSpec, ParticipantId, ParticipantsConfig, ReplicatedLog, ReplicatedLogOptions,
};
use slog::Drain;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let logger = create_root_logger();
    let network = InProcessNetwork::new();
    let ids: Vec<ParticipantId> = vec!["id-1".into(), "id-2".into(), "id-3".into()];

    let mut logs = vec![];
    for id in ids.iter() {
        let factory = DefaultParticipantsFactory::new(Arc::new(network.clone()), ReplicatedLogOptions::default())?;
        let log = Arc::new(ReplicatedLog::new(
            logger.clone(),
            id.clone(),
            LogCore::new(Box::new(InMemoryLogStore::new())),
            Arc::new(factory),
        )?);
        network.register(&log);
        logs.push(log);
    }

    let config = ParticipantsConfig::new(1, ids.iter().cloned(), 2);
    let term_spec = LogTermSpec {
        term: LogTerm::new(1),
        leader: Some(ids[0].clone()),
    };
    // Followers first, so the leader's first requests find them.
    for log in logs.iter().rev() {
        log.update_config(term_spec.clone(), config.clone()).await?;
    }

    let leader = &logs[0];
    let mut last = None;
    for i in 0..10 {
        let payload = LogPayload::create_from_string(&format!("hello-{}", i));
        last = Some(leader.insert(payload, false).await?);
    }
    if let Some(index) = last {
        let result = tokio::time::timeout(Duration::from_secs(5), leader.wait_for(index)).await??;
        slog::info!(logger, "Committed {:?}: {:?}", result.commit_index, result.quorum);
    }

    for log in logs.iter() {
        match log.get_status().await {
            LogStatus::Leader(status) => slog::info!(
                logger,
                "{} leads {:?}: {:?}, followers {:?}",
                log.participant_id(),
                status.term,
                status.local,
                status.follower
            ),
            other => slog::info!(logger, "{}: {:?}", log.participant_id(), other.local()),
        }
    }

    Ok(())
}

fn create_root_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
