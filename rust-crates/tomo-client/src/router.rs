use crate::{
    Error,
    Result,
    address::validate_identifier,
    cache::StateCache,
    config::ClusterConfig,
    executor::{
        LocalSigner,
        TransactionExecutor,
        WalletSigner,
    },
    instructions::{
        CrankSchedule,
        InstructionBuilder,
    },
    ledger::{
        LedgerClient,
        LedgerKind,
    },
    local_identity::LocalSigningIdentity,
    program::INVENTORY_SLOTS,
    reader::{
        DualLedgerReader,
        ResolvedEntity,
    },
    secure_store::SecureStore,
    wallet::ExternalWallet,
};
use solana_sdk::{
    instruction::Instruction,
    pubkey::Pubkey,
    signature::Signature,
};
use std::{
    fmt,
    sync::Arc,
};
use tracing::{
    info,
    warn,
};

/// Every mutating game action the client can request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    Init,
    /// Creation and delegation in one owner-signed transaction.
    Hatch,
    CollectReward,
    Feed,
    UseItem { slot: u8 },
    TriggerItemDrop,
    Delegate,
    Undelegate,
    Delete,
    OpenItemDrop,
    RandomEvent,
    StartRandomEvents(CrankSchedule),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Init => "init",
            Action::Hatch => "hatch",
            Action::CollectReward => "collect-reward",
            Action::Feed => "feed",
            Action::UseItem { .. } => "use-item",
            Action::TriggerItemDrop => "trigger-item-drop",
            Action::Delegate => "delegate",
            Action::Undelegate => "undelegate",
            Action::Delete => "delete",
            Action::OpenItemDrop => "open-item-drop",
            Action::RandomEvent => "random-event",
            Action::StartRandomEvents(_) => "start-random-events",
        }
    }

    pub fn route(&self) -> Route {
        match self {
            Action::Init | Action::Hatch | Action::Delegate | Action::Delete => Route {
                pairing: Pairing::PrimaryBase,
                requires_owner_signature: true,
            },
            Action::CollectReward
            | Action::Feed
            | Action::UseItem { .. }
            | Action::TriggerItemDrop => Route {
                pairing: Pairing::LocalBase,
                requires_owner_signature: false,
            },
            // undelegate is signed locally but must be observed by the rollup
            Action::Undelegate
            | Action::OpenItemDrop
            | Action::RandomEvent
            | Action::StartRandomEvents(_) => Route {
                pairing: Pairing::LocalRollup,
                requires_owner_signature: false,
            },
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SigningSource {
    PrimaryWallet,
    LocalIdentity,
}

/// Signer and target ledger for one executor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Pairing {
    PrimaryBase,
    LocalBase,
    LocalRollup,
}

impl Pairing {
    pub fn ledger(&self) -> LedgerKind {
        match self {
            Pairing::PrimaryBase | Pairing::LocalBase => LedgerKind::Base,
            Pairing::LocalRollup => LedgerKind::Rollup,
        }
    }

    pub fn signer(&self) -> SigningSource {
        match self {
            Pairing::PrimaryBase => SigningSource::PrimaryWallet,
            Pairing::LocalBase | Pairing::LocalRollup => SigningSource::LocalIdentity,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Route {
    pub pairing: Pairing,
    /// The connected wallet must own the entity, when it already exists.
    pub requires_owner_signature: bool,
}

/// Top-level orchestration: routes each action to an executor and keeps the
/// cache in step with confirmed mutations.
pub struct OperationRouter<B, R, W, S> {
    reader: DualLedgerReader<B, R>,
    cache: StateCache,
    identity: Arc<LocalSigningIdentity<S>>,
    wallet: Arc<W>,
    instructions: InstructionBuilder,
    primary_base: TransactionExecutor<B, WalletSigner<W>>,
    local_base: TransactionExecutor<B, LocalSigner<S>>,
    local_rollup: TransactionExecutor<R, LocalSigner<S>>,
}

impl<B, R, W, S> OperationRouter<B, R, W, S>
where
    B: LedgerClient,
    R: LedgerClient,
    W: ExternalWallet,
    S: SecureStore,
{
    pub fn new(
        config: &ClusterConfig,
        base: Arc<B>,
        rollup: Arc<R>,
        wallet: Arc<W>,
        store: S,
    ) -> Self {
        let deriver = config.deriver();
        let identity = Arc::new(LocalSigningIdentity::new(store));
        let poll = config.confirm_poll_interval;
        Self {
            reader: DualLedgerReader::new(
                Arc::clone(&base),
                Arc::clone(&rollup),
                deriver,
                config.oracle(),
            ),
            cache: StateCache::new(),
            identity: Arc::clone(&identity),
            wallet: Arc::clone(&wallet),
            instructions: InstructionBuilder::new(deriver),
            primary_base: TransactionExecutor::new(
                Arc::clone(&base),
                WalletSigner::new(wallet, config.chain.clone()),
                LedgerKind::Base,
                poll,
            ),
            local_base: TransactionExecutor::new(
                base,
                LocalSigner::new(Arc::clone(&identity)),
                LedgerKind::Base,
                poll,
            ),
            local_rollup: TransactionExecutor::new(
                rollup,
                LocalSigner::new(identity),
                LedgerKind::Rollup,
                poll,
            ),
        }
    }

    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    pub fn identity(&self) -> &LocalSigningIdentity<S> {
        &self.identity
    }

    pub fn wallet_public_key(&self) -> Option<Pubkey> {
        self.wallet.public_key()
    }

    pub fn entity_address(&self, identifier: &str) -> Result<Pubkey> {
        self.instructions.deriver().entity_address(identifier)
    }

    /// Cached read; runs the full dual-ledger resolution on a miss.
    pub async fn fetch(&self, identifier: &str) -> Result<Option<Arc<ResolvedEntity>>> {
        validate_identifier(identifier)?;
        if let Some(entry) = self.cache.get(identifier) {
            return Ok(entry.resolved);
        }
        self.refresh(identifier).await
    }

    /// Always re-resolves and replaces the cached entry.
    pub async fn refresh(&self, identifier: &str) -> Result<Option<Arc<ResolvedEntity>>> {
        let ticket = self.cache.ticket(identifier);
        let resolved = self.reader.fetch(identifier).await?.map(Arc::new);
        self.cache.store(identifier, ticket, resolved.clone());
        Ok(resolved)
    }

    /// Runs `action` for `identifier`. Returns once the transaction is
    /// confirmed and the cache has been refreshed.
    pub async fn perform(&self, action: Action, identifier: &str) -> Result<Signature> {
        validate_identifier(identifier)?;
        self.precheck(action, identifier).await?;

        let route = action.route();
        if route.pairing.signer() == SigningSource::LocalIdentity {
            self.identity.get_or_create().await?;
        }

        let name = action.name();
        let build = |payer: &Pubkey| self.build(action, identifier, payer);
        let signature = match route.pairing {
            Pairing::PrimaryBase => self.primary_base.execute(name, build).await,
            Pairing::LocalBase => self.local_base.execute(name, build).await,
            Pairing::LocalRollup => self.local_rollup.execute(name, build).await,
        }?;
        info!(action = name, %identifier, %signature, pairing = ?route.pairing, "action confirmed");

        self.settle(identifier).await;
        Ok(signature)
    }

    /// Forgets the local identity and every cached entry. Irreversible.
    pub async fn logout(&self) -> Result<()> {
        self.identity.clear().await?;
        self.cache.clear();
        info!("logged out, local identity cleared");
        Ok(())
    }

    async fn settle(&self, identifier: &str) {
        self.cache.invalidate(identifier);
        if let Err(err) = self.refresh(identifier).await {
            warn!(%identifier, error = %err, "refetch after confirmed action failed");
        }
    }

    async fn precheck(&self, action: Action, identifier: &str) -> Result<()> {
        match action {
            Action::UseItem { slot } if usize::from(slot) >= INVENTORY_SLOTS => {
                return Err(Error::not_permitted(
                    action.name(),
                    format!("slot {slot} is outside the {INVENTORY_SLOTS}-slot inventory"),
                ));
            }
            _ => {}
        }
        if action.route().requires_owner_signature {
            self.precheck_owner(action, identifier).await?;
        }
        Ok(())
    }

    async fn precheck_owner(&self, action: Action, identifier: &str) -> Result<()> {
        let wallet = self
            .wallet
            .public_key()
            .ok_or_else(|| Error::SignerUnavailable("no wallet connected".to_string()))?;

        // delegation status must be current, so bypass the cache
        let resolved = self.reader.fetch(identifier).await?;
        let Some(resolved) = resolved else {
            return match action {
                Action::Delete => Err(Error::EntityNotFound(identifier.to_string())),
                _ => Ok(()),
            };
        };
        if action == Action::Delete && resolved.is_delegated {
            return Err(Error::not_permitted(
                action.name(),
                "entity is delegated to the rollup, undelegate first",
            ));
        }
        if wallet != resolved.record.owning_identity {
            return Err(Error::not_permitted(
                action.name(),
                format!("wallet {wallet} does not own this entity"),
            ));
        }
        Ok(())
    }

    fn build(
        &self,
        action: Action,
        identifier: &str,
        payer: &Pubkey,
    ) -> Result<Vec<Instruction>> {
        let ix = &self.instructions;
        let instructions = match action {
            Action::Init => vec![ix.init(identifier, payer)?],
            Action::Hatch => vec![ix.init(identifier, payer)?, ix.delegate(identifier, payer)?],
            Action::CollectReward => vec![ix.get_coin(identifier)?],
            Action::Feed => vec![ix.feed(identifier)?],
            Action::UseItem { slot } => vec![ix.use_item(identifier, slot)?],
            Action::TriggerItemDrop => vec![ix.trigger_item_drop(identifier)?],
            Action::Delegate => vec![ix.delegate(identifier, payer)?],
            Action::Undelegate => vec![ix.undelegate(identifier, payer)?],
            Action::Delete => vec![ix.delete(identifier, payer)?],
            Action::OpenItemDrop => vec![ix.open_item_drop(identifier, payer, rand::random())?],
            Action::RandomEvent => vec![ix.random_event(identifier, payer, rand::random())?],
            Action::StartRandomEvents(schedule) => {
                vec![ix.start_random_events(identifier, payer, schedule)?]
            }
        };
        Ok(instructions)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::test_helpers::TestContext;

    const UID: &str = "tag-1";

    #[test]
    fn route__undelegate__local_identity_on_rollup() {
        let route = Action::Undelegate.route();
        assert_eq!(route.pairing.signer(), SigningSource::LocalIdentity);
        assert_eq!(route.pairing.ledger(), LedgerKind::Rollup);
        assert!(!route.requires_owner_signature);
    }

    #[test]
    fn route__owner_actions__primary_wallet_on_base() {
        for action in [Action::Init, Action::Hatch, Action::Delegate, Action::Delete] {
            let route = action.route();
            assert_eq!(route.pairing, Pairing::PrimaryBase, "{action}");
            assert!(route.requires_owner_signature, "{action}");
        }
    }

    #[test]
    fn route__randomized_actions__rollup() {
        for action in [
            Action::OpenItemDrop,
            Action::RandomEvent,
            Action::StartRandomEvents(CrankSchedule {
                task_id: 1,
                interval_millis: 1_000,
                iterations: 1,
            }),
        ] {
            assert_eq!(action.route().pairing.ledger(), LedgerKind::Rollup, "{action}");
        }
    }

    #[test]
    fn route__permissionless_actions__local_identity_on_base() {
        for action in [
            Action::CollectReward,
            Action::Feed,
            Action::UseItem { slot: 0 },
            Action::TriggerItemDrop,
        ] {
            assert_eq!(action.route().pairing, Pairing::LocalBase, "{action}");
        }
    }

    #[tokio::test]
    async fn perform__success__cache_holds_post_action_state() {
        // given
        let ctx = TestContext::new();
        ctx.router.perform(Action::Init, UID).await.unwrap();

        // when
        ctx.router.perform(Action::CollectReward, UID).await.unwrap();

        // then
        let entry = ctx.router.cache().get(UID).unwrap();
        assert_eq!(entry.resolved.unwrap().record.reward_balance, 1);
    }

    #[tokio::test]
    async fn perform__local_action__creates_identity_lazily() {
        // given
        let ctx = TestContext::new();
        ctx.router.perform(Action::Init, UID).await.unwrap();
        assert!(ctx.router.identity().get().await.unwrap().is_none());

        // when
        ctx.router.perform(Action::Feed, UID).await.ok();

        // then
        assert!(ctx.router.identity().get().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn perform__failed_action__cache_untouched() {
        // given
        let ctx = TestContext::new();
        ctx.router.perform(Action::Init, UID).await.unwrap();
        let before = ctx.router.fetch(UID).await.unwrap().unwrap();

        // when
        let result = ctx.router.perform(Action::Feed, UID).await;

        // then
        assert!(matches!(result, Err(Error::InsufficientBalance { .. })));
        let after = ctx.router.cache().get(UID).unwrap().resolved.unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn perform__use_item_out_of_range__refused_locally() {
        // given
        let ctx = TestContext::new();

        // when
        let result = ctx.router.perform(Action::UseItem { slot: 8 }, UID).await;

        // then
        assert!(matches!(result, Err(Error::ActionNotPermitted { .. })));
        assert_eq!(ctx.base.blockhash_requests(), 0);
    }

    #[tokio::test]
    async fn perform__delete_missing_entity__not_found() {
        let ctx = TestContext::new();
        let result = ctx.router.perform(Action::Delete, UID).await;
        assert!(matches!(result, Err(Error::EntityNotFound(_))));
    }

    #[tokio::test]
    async fn perform__owner_action_on_foreign_entity__refused_before_signing() {
        // given
        let owner = TestContext::new();
        owner.router.perform(Action::Init, UID).await.unwrap();
        let address = owner.router.entity_address(UID).unwrap();
        let account = owner.cluster.account(LedgerKind::Base, &address).unwrap();
        let stranger = TestContext::new();
        stranger.cluster.put_base_account(address, account);

        // when
        let results = [
            stranger.router.perform(Action::Delegate, UID).await,
            stranger.router.perform(Action::Init, UID).await,
        ];

        // then
        for result in results {
            assert!(matches!(result, Err(Error::ActionNotPermitted { .. })), "{result:?}");
        }
        assert!(stranger.wallet.sign_requests().is_empty());
        assert_eq!(stranger.base.blockhash_requests(), 0);
    }

    #[test]
    fn route__owner_signature_flag__only_on_primary_wallet_pairing() {
        for action in [
            Action::Init,
            Action::CollectReward,
            Action::Undelegate,
            Action::Delete,
            Action::RandomEvent,
        ] {
            let route = action.route();
            assert_eq!(
                route.requires_owner_signature,
                route.pairing.signer() == SigningSource::PrimaryWallet,
                "{action}"
            );
        }
    }

    #[tokio::test]
    async fn perform__refetch_fails__action_still_succeeds() {
        // given
        let ctx = TestContext::new();
        ctx.router.perform(Action::Init, UID).await.unwrap();
        ctx.router.identity().get_or_create().await.unwrap();
        ctx.base.fail_reads_after_next_send(true);

        // when
        let result = ctx.router.perform(Action::CollectReward, UID).await;

        // then
        assert!(result.is_ok());
        assert!(ctx.router.cache().get(UID).is_none());
    }

    #[tokio::test]
    async fn logout__clears_identity_and_cache() {
        // given
        let ctx = TestContext::new();
        ctx.router.perform(Action::Init, UID).await.unwrap();
        ctx.router.identity().get_or_create().await.unwrap();

        // when
        ctx.router.logout().await.unwrap();

        // then
        assert!(ctx.router.identity().get().await.unwrap().is_none());
        assert!(ctx.router.cache().is_empty());
    }

    #[tokio::test]
    async fn perform__invalid_identifier__rejected_before_any_work() {
        let ctx = TestContext::new();
        let result = ctx.router.perform(Action::Init, &"x".repeat(33)).await;
        assert!(matches!(result, Err(Error::InvalidIdentifier { .. })));
        assert_eq!(ctx.base.blockhash_requests(), 0);
    }
}
