#![allow(non_snake_case)]

use tomo_client::{
    Error,
    ledger::LedgerKind,
    program::DELEGATION_PROGRAM_ID,
    router::Action,
    test_helpers::*,
};

const UID: &str = "tag-delegation";

async fn delegated_context() -> TestContext {
    let ctx = TestContext::new();
    ctx.router.perform(Action::Init, UID).await.unwrap();
    ctx.router.perform(Action::Delegate, UID).await.unwrap();
    ctx
}

#[tokio::test]
async fn delegate__confirmed__next_fetch_reads_rollup() {
    // given
    let ctx = TestContext::new();
    ctx.router.perform(Action::Init, UID).await.unwrap();

    // when
    ctx.router.perform(Action::Delegate, UID).await.unwrap();

    // then
    let resolved = ctx.router.fetch(UID).await.unwrap().unwrap();
    assert!(resolved.is_delegated);
    assert_eq!(resolved.source, LedgerKind::Rollup);
    let address = ctx.router.entity_address(UID).unwrap();
    let base_account = ctx.cluster.account(LedgerKind::Base, &address).unwrap();
    assert_eq!(base_account.owner, DELEGATION_PROGRAM_ID);
}

#[tokio::test]
async fn hatch__one_wallet_signature__created_and_delegated() {
    // given
    let ctx = TestContext::new();

    // when
    ctx.router.perform(Action::Hatch, UID).await.unwrap();

    // then
    assert_eq!(ctx.wallet.sign_requests().len(), 1);
    assert_eq!(ctx.base.sent_signatures().len(), 1);
    let resolved = ctx.router.fetch(UID).await.unwrap().unwrap();
    assert!(resolved.is_delegated);
    assert_eq!(resolved.record.satiety, 100);
}

#[tokio::test]
async fn undelegate__signed_locally_and_sent_to_rollup() {
    // given
    let ctx = delegated_context().await;
    let wallet_requests = ctx.wallet.sign_requests().len();
    let base_sent = ctx.base.sent_signatures().len();

    // when
    let signature = ctx.router.perform(Action::Undelegate, UID).await.unwrap();

    // then
    assert_eq!(ctx.rollup.sent_signatures(), vec![signature]);
    assert_eq!(ctx.base.sent_signatures().len(), base_sent);
    assert_eq!(ctx.wallet.sign_requests().len(), wallet_requests);
}

#[tokio::test]
async fn undelegate__confirmed__base_authority_restored_and_delete_permitted() {
    // given
    let ctx = delegated_context().await;

    // when
    ctx.router.perform(Action::Undelegate, UID).await.unwrap();

    // then
    let resolved = ctx.router.fetch(UID).await.unwrap().unwrap();
    assert!(!resolved.is_delegated);
    assert_eq!(resolved.source, LedgerKind::Base);

    ctx.router.perform(Action::Delete, UID).await.unwrap();
    assert_eq!(ctx.router.fetch(UID).await.unwrap(), None);
}

#[tokio::test]
async fn undelegate__rollup_changes_committed_back_to_base() {
    // given
    let ctx = delegated_context().await;
    ctx.cluster.edit_record(UID, |tomo| tomo.pending_drop = true);
    ctx.router.perform(Action::OpenItemDrop, UID).await.unwrap();

    // when
    ctx.router.perform(Action::Undelegate, UID).await.unwrap();

    // then
    let base = ctx.cluster.record(LedgerKind::Base, UID).unwrap();
    assert!(!base.pending_drop);
    assert_eq!(base.inventory_slots.iter().filter(|item| **item != 0).count(), 1);
    assert!(ctx.cluster.record(LedgerKind::Rollup, UID).is_none());
}

#[tokio::test]
async fn delete__while_delegated__refused_before_signing() {
    // given
    let ctx = delegated_context().await;
    let wallet_requests = ctx.wallet.sign_requests().len();

    // when
    let result = ctx.router.perform(Action::Delete, UID).await;

    // then
    let err = result.unwrap_err();
    assert!(matches!(err, Error::ActionNotPermitted { .. }), "{err}");
    assert_eq!(ctx.wallet.sign_requests().len(), wallet_requests);
    assert!(ctx.cluster.record(LedgerKind::Base, UID).is_some());
}

#[tokio::test]
async fn delete__not_owner__refused() {
    // given
    let ctx = TestContext::new();
    ctx.router.perform(Action::Init, UID).await.unwrap();
    let stranger = TestContext::new();
    let record = ctx.cluster.record(LedgerKind::Base, UID).unwrap();
    let address = ctx.router.entity_address(UID).unwrap();
    let account = ctx.cluster.account(LedgerKind::Base, &address).unwrap();
    stranger.cluster.put_base_account(address, account);

    // when
    let result = stranger.router.perform(Action::Delete, UID).await;

    // then
    let err = result.unwrap_err();
    assert!(matches!(err, Error::ActionNotPermitted { .. }), "{err}");
    assert_eq!(
        stranger.cluster.record(LedgerKind::Base, UID).unwrap(),
        record
    );
}

#[tokio::test]
async fn delete__no_wallet__signer_unavailable() {
    // given
    let owner = TestContext::new();
    owner.router.perform(Action::Init, UID).await.unwrap();
    let address = owner.router.entity_address(UID).unwrap();
    let account = owner.cluster.account(LedgerKind::Base, &address).unwrap();
    let ctx = TestContext::with_wallet(FakeWallet::disconnected());
    ctx.cluster.put_base_account(address, account);

    // when
    let result = ctx.router.perform(Action::Delete, UID).await;

    // then
    assert!(matches!(result, Err(Error::SignerUnavailable(_))));
}

#[tokio::test]
async fn fetch__delegated_rollup_down__stale_base_copy() {
    // given
    let ctx = delegated_context().await;
    ctx.rollup.fail_reads(true);

    // when
    let resolved = ctx.router.refresh(UID).await.unwrap().unwrap();

    // then
    assert!(resolved.is_delegated);
    assert_eq!(resolved.source, LedgerKind::Base);
    assert!(resolved.is_stale());
}

#[tokio::test]
async fn start_random_events__delegated__crank_scheduled_on_rollup() {
    // given
    let ctx = delegated_context().await;
    let schedule = tomo_client::instructions::CrankSchedule {
        task_id: 7,
        interval_millis: 30_000,
        iterations: 4,
    };

    // when
    ctx.router
        .perform(Action::StartRandomEvents(schedule), UID)
        .await
        .unwrap();

    // then
    let address = ctx.router.entity_address(UID).unwrap();
    assert_eq!(ctx.cluster.scheduled_cranks(), vec![(address, schedule)]);
    assert_eq!(ctx.rollup.sent_signatures().len(), 1);
}
