use crate::{
    Result,
    address::validate_identifier,
    ledger::LedgerClient,
    reader::ResolvedEntity,
    router::OperationRouter,
    secure_store::SecureStore,
    wallet::ExternalWallet,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::mpsc,
    time::MissedTickBehavior,
};
use tracing::debug;

#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent {
    Updated(Arc<ResolvedEntity>),
    Missing,
    Failed(String),
}

/// Re-resolves `identifier` every `interval` and reports changes.
///
/// Only state changes are sent. Returns once the receiving side is dropped.
pub async fn watch_entity<B, R, W, S>(
    router: &OperationRouter<B, R, W, S>,
    identifier: &str,
    interval: Duration,
    events: mpsc::UnboundedSender<WatchEvent>,
) -> Result<()>
where
    B: LedgerClient,
    R: LedgerClient,
    W: ExternalWallet,
    S: SecureStore,
{
    validate_identifier(identifier)?;

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last: Option<WatchEvent> = None;

    loop {
        tokio::select! {
            _ = events.closed() => break,
            _ = ticker.tick() => {
                let event = match router.refresh(identifier).await {
                    Ok(Some(resolved)) => WatchEvent::Updated(resolved),
                    Ok(None) => WatchEvent::Missing,
                    Err(err) => WatchEvent::Failed(err.to_string()),
                };
                if last.as_ref() == Some(&event) {
                    continue;
                }
                if events.send(event.clone()).is_err() {
                    break;
                }
                last = Some(event);
            }
        }
    }

    debug!(%identifier, "watcher stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        router::Action,
        test_helpers::TestContext,
    };

    const UID: &str = "tag-1";

    #[tokio::test]
    async fn watch_entity__emits_only_on_change_and_stops_with_receiver() {
        // given
        let ctx = TestContext::new();
        ctx.router.perform(Action::Init, UID).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        // when
        let watcher = watch_entity(&ctx.router, UID, Duration::from_millis(1), tx);
        let observer = async {
            let first = rx.recv().await;
            ctx.router
                .perform(Action::CollectReward, UID)
                .await
                .unwrap();
            let second = rx.recv().await;
            drop(rx);
            (first, second)
        };
        let (result, (first, second)) = tokio::join!(watcher, observer);

        // then
        result.unwrap();
        let Some(WatchEvent::Updated(first)) = first else {
            panic!("expected an update, got {first:?}");
        };
        let Some(WatchEvent::Updated(second)) = second else {
            panic!("expected an update, got {second:?}");
        };
        assert_eq!(first.record.reward_balance, 0);
        assert_eq!(second.record.reward_balance, 1);
    }

    #[tokio::test]
    async fn watch_entity__never_created__missing() {
        // given
        let ctx = TestContext::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        // when
        let watcher = watch_entity(&ctx.router, UID, Duration::from_millis(1), tx);
        let observer = async {
            let first = rx.recv().await;
            drop(rx);
            first
        };
        let (result, first) = tokio::join!(watcher, observer);

        // then
        result.unwrap();
        assert_eq!(first, Some(WatchEvent::Missing));
    }
}
