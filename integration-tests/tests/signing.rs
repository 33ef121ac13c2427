#![allow(non_snake_case)]

use solana_sdk::signer::Signer;
use std::sync::Arc;
use tomo_client::{
    Error,
    FailureStage,
    feedback::user_message,
    router::Action,
    secure_store::{
        InMemorySecureStore,
        SecureStore,
    },
    test_helpers::*,
};

const UID: &str = "tag-signing";

#[tokio::test]
async fn perform__wallet_cancels__silent_and_cache_untouched() {
    // given
    let ctx = TestContext::with_wallet(FakeWallet::cancelling());
    assert_eq!(ctx.router.fetch(UID).await.unwrap(), None);
    let cached_at = ctx.router.cache().get(UID).unwrap().fetched_at;

    // when
    let result = ctx.router.perform(Action::Init, UID).await;

    // then
    let err = result.unwrap_err();
    assert!(err.is_cancellation());
    assert_eq!(user_message(&err), None);
    assert!(ctx.base.sent_signatures().is_empty());
    assert_eq!(ctx.router.cache().get(UID).unwrap().fetched_at, cached_at);
}

#[tokio::test]
async fn perform__wallet_cancels_once__retry_succeeds() {
    // given
    let ctx = TestContext::new();
    ctx.wallet.push_outcome(ScriptedOutcome::Cancel);
    let first = ctx.router.perform(Action::Init, UID).await;

    // when
    let second = ctx.router.perform(Action::Init, UID).await;

    // then
    assert!(matches!(first, Err(Error::UserCancelled)));
    assert!(second.is_ok());
    assert_eq!(ctx.wallet.sign_requests().len(), 2);
}

#[tokio::test]
async fn perform__wallet_fails__transaction_failed_without_signature() {
    // given
    let ctx = TestContext::with_wallet(FakeWallet::failing("hardware wallet locked"));

    // when
    let result = ctx.router.perform(Action::Init, UID).await;

    // then
    let err = result.unwrap_err();
    assert!(matches!(err, Error::TransactionFailed { signature: None, .. }), "{err}");
    assert!(user_message(&err).unwrap().contains("try again"));
}

#[tokio::test]
async fn perform__owner_action_without_wallet__signer_unavailable() {
    // given
    let ctx = TestContext::with_wallet(FakeWallet::disconnected());

    // when
    let result = ctx.router.perform(Action::Init, UID).await;

    // then
    let err = result.unwrap_err();
    assert!(matches!(err, Error::SignerUnavailable(_)), "{err}");
    assert_eq!(
        user_message(&err).as_deref(),
        Some("Please connect your wallet first")
    );
}

#[tokio::test]
async fn perform__wallet_request__carries_chain_descriptor() {
    // given
    let ctx = TestContext::new();

    // when
    ctx.router.perform(Action::Init, UID).await.unwrap();

    // then
    let requests = ctx.wallet.sign_requests();
    assert_eq!(requests, vec![TestContext::config().chain]);
}

#[tokio::test]
async fn perform__blockhash_expires_before_confirmation__expired_failure() {
    // given
    let ctx = TestContext::new();
    ctx.cluster.set_blockhash_validity(2);
    ctx.base.withhold_confirmations(true);

    // when
    let result = ctx.router.perform(Action::Init, UID).await;

    // then
    let err = result.unwrap_err();
    assert!(err.submitted_signature().is_some());
    assert!(err.is_expired());
    assert!(err.is_transient());
    assert_eq!(
        user_message(&err).as_deref(),
        Some("Transaction expired. Please try again")
    );
}

#[tokio::test]
async fn perform__send_errors__signature_reported_for_checking() {
    // given
    let ctx = TestContext::new();
    ctx.base.fail_sends(true);

    // when
    let result = ctx.router.perform(Action::Init, UID).await;

    // then
    let err = result.unwrap_err();
    assert!(matches!(
        err,
        Error::TransactionFailed {
            signature: Some(_),
            stage: FailureStage::Submission,
            ..
        }
    ));
    assert!(!err.is_transient());
    let message = user_message(&err).unwrap();
    assert!(message.starts_with("Transaction may have been sent"), "{message}");
}

#[tokio::test]
async fn perform__each_action__fresh_blockhash() {
    // given
    let ctx = TestContext::new();
    ctx.router.perform(Action::Init, UID).await.unwrap();

    // when
    ctx.router
        .perform(Action::CollectReward, UID)
        .await
        .unwrap();
    ctx.router
        .perform(Action::CollectReward, UID)
        .await
        .unwrap();

    // then
    assert_eq!(ctx.base.blockhash_requests(), 3);
}

#[tokio::test]
async fn perform__refetch_fails_after_confirmation__still_success() {
    // given
    let ctx = TestContext::new();
    ctx.base.fail_reads_after_next_send(true);

    // when
    let result = ctx.router.perform(Action::Init, UID).await;

    // then
    assert!(result.is_ok());
    assert!(ctx.router.cache().get(UID).is_none());
}

#[tokio::test]
async fn get_or_create__sequential__same_keypair() {
    // given
    let ctx = TestContext::new();

    // when
    let first = ctx.router.identity().get_or_create().await.unwrap();
    let second = ctx.router.identity().get_or_create().await.unwrap();

    // then
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn get_or_create__concurrent__single_persisted_identity() {
    // given
    let ctx = TestContext::new();
    let identity = ctx.router.identity();

    // when
    let (a, b, c) = tokio::join!(
        identity.get_or_create(),
        identity.get_or_create(),
        identity.get_or_create()
    );

    // then
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
    assert_eq!(a.pubkey(), b.pubkey());
    assert_eq!(b.pubkey(), c.pubkey());
    assert!(ctx.store.get(tomo_client::local_identity::IDENTITY_KEY).await.unwrap().is_some());
}

#[tokio::test]
async fn local_identity__survives_restart_with_same_store() {
    // given
    let store = InMemorySecureStore::new();
    let before = TestContext::with_parts(FakeWallet::approving(), store.clone());
    let created = before.router.identity().get_or_create().await.unwrap().pubkey();

    // when
    let after = TestContext::with_parts(FakeWallet::approving(), store);
    let restored = after.router.identity().public_key().await.unwrap();

    // then
    assert_eq!(restored, Some(created));
}

#[tokio::test]
async fn logout__clears_identity_and_cache() {
    // given
    let ctx = TestContext::new();
    ctx.router.perform(Action::Init, UID).await.unwrap();
    ctx.router
        .perform(Action::CollectReward, UID)
        .await
        .unwrap();
    let old = ctx.router.identity().public_key().await.unwrap().unwrap();

    // when
    ctx.router.logout().await.unwrap();

    // then
    assert!(ctx.router.cache().is_empty());
    assert_eq!(ctx.router.identity().public_key().await.unwrap(), None);
    let fresh = ctx.router.identity().get_or_create().await.unwrap();
    assert_ne!(fresh.pubkey(), old);
}
