use crate::{
    Result,
    address::AddressDeriver,
    codec::{
        self,
        EntityRecord,
    },
    delegation::DelegationOracle,
    ledger::{
        LedgerClient,
        LedgerKind,
    },
};
use std::sync::Arc;
use tracing::{
    debug,
    warn,
};

/// An entity record together with where it was read from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedEntity {
    pub record: EntityRecord,
    /// Recomputed from the base ledger owner on every fetch.
    pub is_delegated: bool,
    pub source: LedgerKind,
}

impl ResolvedEntity {
    /// True when the record is delegated but the rollup copy could not be read.
    pub fn is_stale(&self) -> bool {
        self.is_delegated && self.source == LedgerKind::Base
    }
}

pub struct DualLedgerReader<B, R> {
    base: Arc<B>,
    rollup: Arc<R>,
    deriver: AddressDeriver,
    oracle: DelegationOracle,
}

impl<B, R> Clone for DualLedgerReader<B, R> {
    fn clone(&self) -> Self {
        Self {
            base: Arc::clone(&self.base),
            rollup: Arc::clone(&self.rollup),
            deriver: self.deriver,
            oracle: self.oracle,
        }
    }
}

impl<B, R> DualLedgerReader<B, R>
where
    B: LedgerClient,
    R: LedgerClient,
{
    pub fn new(
        base: Arc<B>,
        rollup: Arc<R>,
        deriver: AddressDeriver,
        oracle: DelegationOracle,
    ) -> Self {
        Self {
            base,
            rollup,
            deriver,
            oracle,
        }
    }

    /// `Ok(None)` means the entity was never created.
    pub async fn fetch(&self, identifier: &str) -> Result<Option<ResolvedEntity>> {
        let address = self.deriver.entity_address(identifier)?;

        let Some(base_account) = self.base.get_account(&address).await? else {
            debug!(%identifier, %address, "entity absent on base ledger");
            return Ok(None);
        };
        let base_record = codec::decode(&base_account.data)?;

        if !self.oracle.is_delegated(&base_account.owner) {
            return Ok(Some(ResolvedEntity {
                record: base_record,
                is_delegated: false,
                source: LedgerKind::Base,
            }));
        }

        match self.rollup.get_account(&address).await {
            Ok(Some(rollup_account)) => {
                let record = codec::decode(&rollup_account.data)?;
                Ok(Some(ResolvedEntity {
                    record,
                    is_delegated: true,
                    source: LedgerKind::Rollup,
                }))
            }
            Ok(None) => {
                warn!(
                    %identifier,
                    %address,
                    endpoint = self.rollup.endpoint(),
                    "delegated entity missing on rollup, using base copy"
                );
                Ok(Some(Self::stale(base_record)))
            }
            Err(err) => {
                warn!(
                    %identifier,
                    %address,
                    error = %err,
                    "rollup read failed, using base copy"
                );
                Ok(Some(Self::stale(base_record)))
            }
        }
    }

    fn stale(record: EntityRecord) -> ResolvedEntity {
        ResolvedEntity {
            record,
            is_delegated: true,
            source: LedgerKind::Base,
        }
    }
}
