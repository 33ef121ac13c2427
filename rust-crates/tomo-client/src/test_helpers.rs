//! In-memory base ledger and rollup that run the program's instruction
//! semantics, plus fakes for the wallet and a fully wired router.

use crate::{
    Error,
    Result,
    address::AddressDeriver,
    codec::{
        self,
        EntityRecord,
    },
    config::{
        ClusterConfig,
        Network,
    },
    instructions::CrankSchedule,
    ledger::{
        FreshnessToken,
        LedgerClient,
        LedgerKind,
        TransactionStatus,
    },
    program::{
        DELEGATION_PROGRAM_ID,
        FEED_COST,
        FEED_SATIETY_GAIN,
        INVENTORY_SLOTS,
        MAX_SATIETY,
        NOT_ENOUGH_COINS_ERROR,
        discriminators,
    },
    router::OperationRouter,
    secure_store::InMemorySecureStore,
    wallet::{
        ChainDescriptor,
        ExternalWallet,
        SignOutcome,
    },
};
use solana_sdk::{
    account::Account,
    hash::{
        self,
        Hash,
    },
    instruction::InstructionError,
    pubkey::Pubkey,
    signature::{
        Keypair,
        Signature,
    },
    signer::Signer,
    transaction::{
        Transaction,
        TransactionError,
    },
};
use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
    time::Duration,
};

pub const DEFAULT_BLOCKHASH_VALIDITY: u64 = 150;

/// Anchor: account already in use.
pub const ALREADY_IN_USE_ERROR: u32 = 0;
/// Anchor: has_one constraint violated.
pub const CONSTRAINT_HAS_ONE_ERROR: u32 = 2001;
/// Anchor: account owned by the wrong program.
pub const WRONG_OWNER_ERROR: u32 = 3007;
/// Anchor: account not initialized.
pub const NOT_INITIALIZED_ERROR: u32 = 3012;

type ProgramResult<T = ()> = std::result::Result<T, InstructionError>;

struct ClusterState {
    base: HashMap<Pubkey, Account>,
    rollup: HashMap<Pubkey, Account>,
    statuses: HashMap<Signature, std::result::Result<(), TransactionError>>,
    cranks: Vec<(Pubkey, CrankSchedule)>,
    block_height: u64,
    blockhash_validity: u64,
    blockhashes_issued: u64,
}

/// Shared state behind both simulated ledgers.
#[derive(Clone)]
pub struct SimulatedCluster {
    state: Arc<Mutex<ClusterState>>,
    deriver: AddressDeriver,
}

impl Default for SimulatedCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCluster {
    pub fn new() -> Self {
        Self::with_deriver(AddressDeriver::default())
    }

    pub fn with_deriver(deriver: AddressDeriver) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClusterState {
                base: HashMap::new(),
                rollup: HashMap::new(),
                statuses: HashMap::new(),
                cranks: Vec::new(),
                block_height: 1,
                blockhash_validity: DEFAULT_BLOCKHASH_VALIDITY,
                blockhashes_issued: 0,
            })),
            deriver,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap()
    }

    pub fn base(&self) -> FakeLedger {
        FakeLedger::new(self.clone(), LedgerKind::Base)
    }

    pub fn rollup(&self) -> FakeLedger {
        FakeLedger::new(self.clone(), LedgerKind::Rollup)
    }

    pub fn set_blockhash_validity(&self, blocks: u64) {
        self.lock().blockhash_validity = blocks;
    }

    pub fn put_base_account(&self, address: Pubkey, account: Account) {
        self.lock().base.insert(address, account);
    }

    pub fn put_rollup_account(&self, address: Pubkey, account: Account) {
        self.lock().rollup.insert(address, account);
    }

    pub fn account(&self, kind: LedgerKind, address: &Pubkey) -> Option<Account> {
        let state = self.lock();
        match kind {
            LedgerKind::Base => state.base.get(address).cloned(),
            LedgerKind::Rollup => state.rollup.get(address).cloned(),
        }
    }

    /// Decoded record as stored on one ledger, ignoring delegation.
    pub fn record(&self, kind: LedgerKind, identifier: &str) -> Option<EntityRecord> {
        let address = self.deriver.entity_address(identifier).ok()?;
        let account = self.account(kind, &address)?;
        codec::decode(&account.data).ok()
    }

    /// Overwrites a record in place on whichever ledger currently holds it.
    pub fn edit_record(&self, identifier: &str, edit: impl FnOnce(&mut EntityRecord)) {
        let address = self.deriver.entity_address(identifier).unwrap();
        let mut state = self.lock();
        let state = &mut *state;
        let account = match state.rollup.get_mut(&address) {
            Some(account) => account,
            None => state.base.get_mut(&address).unwrap(),
        };
        let mut record = codec::decode(&account.data).unwrap();
        edit(&mut record);
        account.data = codec::encode(&record);
    }

    pub fn scheduled_cranks(&self) -> Vec<(Pubkey, CrankSchedule)> {
        self.lock().cranks.clone()
    }

    fn issue_blockhash(&self) -> FreshnessToken {
        let mut state = self.lock();
        state.blockhashes_issued += 1;
        FreshnessToken {
            blockhash: hash::hash(&state.blockhashes_issued.to_le_bytes()),
            last_valid_block_height: state.block_height + state.blockhash_validity,
        }
    }

    fn advance_block(&self) -> u64 {
        let mut state = self.lock();
        state.block_height += 1;
        state.block_height
    }

    fn status(&self, signature: &Signature) -> TransactionStatus {
        self.lock().statuses.get(signature).cloned()
    }

    /// Applies every instruction or none of them.
    fn process(&self, kind: LedgerKind, transaction: &Transaction) {
        let mut state = self.lock();
        let signature = transaction.signatures[0];
        let mut ledgers = Ledgers {
            base: state.base.clone(),
            rollup: state.rollup.clone(),
            cranks: Vec::new(),
        };

        let mut outcome = Ok(());
        for (index, ix) in transaction.message.instructions.iter().enumerate() {
            let keys = &transaction.message.account_keys;
            let call = ProgramCall {
                kind,
                program: keys[usize::from(ix.program_id_index)],
                accounts: ix
                    .accounts
                    .iter()
                    .map(|i| {
                        (
                            keys[usize::from(*i)],
                            transaction.message.is_signer(usize::from(*i)),
                        )
                    })
                    .collect(),
                data: &ix.data,
            };
            if let Err(err) = ledgers.run(&self.deriver, &call) {
                outcome = Err(TransactionError::InstructionError(index as u8, err));
                break;
            }
        }

        if outcome.is_ok() {
            state.base = ledgers.base;
            state.rollup = ledgers.rollup;
            state.cranks.extend(ledgers.cranks);
        }
        state.statuses.insert(signature, outcome);
    }
}

struct ProgramCall<'a> {
    kind: LedgerKind,
    program: Pubkey,
    accounts: Vec<(Pubkey, bool)>,
    data: &'a [u8],
}

impl ProgramCall<'_> {
    fn key(&self, index: usize) -> ProgramResult<Pubkey> {
        self.accounts
            .get(index)
            .map(|(key, _)| *key)
            .ok_or(InstructionError::NotEnoughAccountKeys)
    }

    fn signer(&self, index: usize) -> ProgramResult<Pubkey> {
        match self.accounts.get(index) {
            Some((key, true)) => Ok(*key),
            Some((_, false)) => Err(InstructionError::MissingRequiredSignature),
            None => Err(InstructionError::NotEnoughAccountKeys),
        }
    }

    fn require(&self, kind: LedgerKind) -> ProgramResult {
        if self.kind == kind {
            Ok(())
        } else {
            Err(InstructionError::UnsupportedProgramId)
        }
    }

    fn args(&self) -> &[u8] {
        &self.data[8..]
    }

    fn arg_u8(&self) -> ProgramResult<u8> {
        self.args()
            .first()
            .copied()
            .ok_or(InstructionError::InvalidInstructionData)
    }

    fn arg_u64(&self, index: usize) -> ProgramResult<u64> {
        let start = index * 8;
        self.args()
            .get(start..start + 8)
            .and_then(|bytes| bytes.try_into().ok())
            .map(u64::from_le_bytes)
            .ok_or(InstructionError::InvalidInstructionData)
    }

    fn arg_string(&self) -> ProgramResult<String> {
        let args = self.args();
        let len = args
            .get(..4)
            .and_then(|bytes| bytes.try_into().ok())
            .map(u32::from_le_bytes)
            .ok_or(InstructionError::InvalidInstructionData)? as usize;
        let bytes = args
            .get(4..4 + len)
            .ok_or(InstructionError::InvalidInstructionData)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| InstructionError::InvalidInstructionData)
    }
}

struct Ledgers {
    base: HashMap<Pubkey, Account>,
    rollup: HashMap<Pubkey, Account>,
    cranks: Vec<(Pubkey, CrankSchedule)>,
}

impl Ledgers {
    fn ledger(&mut self, kind: LedgerKind) -> &mut HashMap<Pubkey, Account> {
        match kind {
            LedgerKind::Base => &mut self.base,
            LedgerKind::Rollup => &mut self.rollup,
        }
    }

    fn load(
        &mut self,
        kind: LedgerKind,
        program: &Pubkey,
        address: &Pubkey,
    ) -> ProgramResult<EntityRecord> {
        let account = self
            .ledger(kind)
            .get(address)
            .ok_or(InstructionError::Custom(NOT_INITIALIZED_ERROR))?;
        if account.owner != *program {
            return Err(InstructionError::Custom(WRONG_OWNER_ERROR));
        }
        codec::decode(&account.data).map_err(|_| InstructionError::InvalidAccountData)
    }

    fn save(&mut self, kind: LedgerKind, address: &Pubkey, record: &EntityRecord) {
        if let Some(account) = self.ledger(kind).get_mut(address) {
            account.data = codec::encode(record);
        }
    }

    fn update(
        &mut self,
        call: &ProgramCall<'_>,
        address: &Pubkey,
        change: impl FnOnce(&mut EntityRecord) -> ProgramResult,
    ) -> ProgramResult {
        let mut record = self.load(call.kind, &call.program, address)?;
        change(&mut record)?;
        self.save(call.kind, address, &record);
        Ok(())
    }

    fn run(&mut self, deriver: &AddressDeriver, call: &ProgramCall<'_>) -> ProgramResult {
        if call.program != deriver.program_id() {
            return Err(InstructionError::IncorrectProgramId);
        }
        let discriminator: [u8; 8] = call
            .data
            .get(..8)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(InstructionError::InvalidInstructionData)?;

        match discriminator {
            discriminators::INIT => self.init(deriver, call),
            discriminators::GET_COIN => self.update(call, &call.key(0)?, |tomo| {
                tomo.reward_balance = tomo
                    .reward_balance
                    .checked_add(1)
                    .ok_or(InstructionError::ArithmeticOverflow)?;
                Ok(())
            }),
            discriminators::FEED => self.update(call, &call.key(0)?, |tomo| {
                if tomo.reward_balance < FEED_COST {
                    return Err(InstructionError::Custom(NOT_ENOUGH_COINS_ERROR));
                }
                tomo.reward_balance -= FEED_COST;
                tomo.satiety = tomo.satiety.saturating_add(FEED_SATIETY_GAIN).min(MAX_SATIETY);
                tomo.last_feed_timestamp = chrono::Utc::now().timestamp();
                Ok(())
            }),
            discriminators::TRIGGER_ITEM_DROP => self.update(call, &call.key(0)?, |tomo| {
                tomo.pending_drop = true;
                Ok(())
            }),
            discriminators::USE_ITEM => {
                let slot = usize::from(call.arg_u8()?);
                if slot >= INVENTORY_SLOTS {
                    return Err(InstructionError::InvalidArgument);
                }
                self.update(call, &call.key(0)?, |tomo| {
                    tomo.inventory_slots[slot] = 0;
                    Ok(())
                })
            }
            discriminators::DELEGATE => self.delegate(call),
            discriminators::UNDELEGATE => self.undelegate(deriver, call),
            discriminators::DELETE => self.delete(call),
            discriminators::OPEN_ITEM_DROP => {
                call.require(LedgerKind::Rollup)?;
                call.signer(0)?;
                let seed = call.arg_u8()?;
                self.update(call, &call.key(1)?, |tomo| {
                    if !tomo.pending_drop {
                        return Ok(());
                    }
                    // a full inventory leaves the drop unopened
                    if let Some(slot) = tomo.first_empty_slot() {
                        tomo.inventory_slots[slot] = seed % 5 + 1;
                        tomo.pending_drop = false;
                    }
                    Ok(())
                })
            }
            discriminators::RANDOM_EVENT => {
                call.require(LedgerKind::Rollup)?;
                call.signer(0)?;
                let seed = call.arg_u8()?;
                self.update(call, &call.key(1)?, |tomo| {
                    if seed % 5 == 0 {
                        tomo.pending_drop = true;
                    }
                    Ok(())
                })
            }
            discriminators::START_RANDOM_EVENTS => {
                call.require(LedgerKind::Rollup)?;
                call.signer(1)?;
                let tomo = call.key(2)?;
                self.load(call.kind, &call.program, &tomo)?;
                let schedule = CrankSchedule {
                    task_id: call.arg_u64(0)?,
                    interval_millis: call.arg_u64(1)?,
                    iterations: call.arg_u64(2)?,
                };
                self.cranks.push((tomo, schedule));
                Ok(())
            }
            _ => Err(InstructionError::InvalidInstructionData),
        }
    }

    fn init(&mut self, deriver: &AddressDeriver, call: &ProgramCall<'_>) -> ProgramResult {
        call.require(LedgerKind::Base)?;
        let tomo = call.key(0)?;
        let crank_payer = call.key(1)?;
        let payer = call.signer(2)?;
        let uid = call.arg_string()?;

        let expected = deriver
            .entity_address(&uid)
            .map_err(|_| InstructionError::InvalidSeeds)?;
        if expected != tomo || deriver.relay_payer_address(&tomo) != crank_payer {
            return Err(InstructionError::InvalidSeeds);
        }
        if self.base.contains_key(&tomo) {
            return Err(InstructionError::Custom(ALREADY_IN_USE_ERROR));
        }

        let record = EntityRecord::new(payer, uid);
        self.base
            .insert(tomo, program_account(call.program, codec::encode(&record)));
        self.base
            .insert(crank_payer, program_account(call.program, vec![1]));
        Ok(())
    }

    fn delegate(&mut self, call: &ProgramCall<'_>) -> ProgramResult {
        call.require(LedgerKind::Base)?;
        call.signer(0)?;
        let tomo = call.key(4)?;
        let crank_payer = call.key(8)?;
        self.load(LedgerKind::Base, &call.program, &tomo)?;

        for address in [tomo, crank_payer] {
            let account = self
                .base
                .get_mut(&address)
                .ok_or(InstructionError::Custom(NOT_INITIALIZED_ERROR))?;
            if account.owner != call.program {
                return Err(InstructionError::Custom(WRONG_OWNER_ERROR));
            }
            let copy = account.clone();
            account.owner = DELEGATION_PROGRAM_ID;
            self.rollup.insert(address, copy);
        }
        Ok(())
    }

    /// Commits the rollup copies back to base and hands ownership back.
    fn undelegate(&mut self, deriver: &AddressDeriver, call: &ProgramCall<'_>) -> ProgramResult {
        call.require(LedgerKind::Rollup)?;
        call.signer(0)?;
        let tomo = call.key(1)?;
        self.load(LedgerKind::Rollup, &call.program, &tomo)?;

        for address in [tomo, deriver.relay_payer_address(&tomo)] {
            if let Some(account) = self.rollup.remove(&address) {
                self.base.insert(address, account);
            }
        }
        Ok(())
    }

    fn delete(&mut self, call: &ProgramCall<'_>) -> ProgramResult {
        call.require(LedgerKind::Base)?;
        let tomo = call.key(0)?;
        let crank_payer = call.key(1)?;
        let owner = call.signer(2)?;
        let record = self.load(LedgerKind::Base, &call.program, &tomo)?;
        if record.owning_identity != owner {
            return Err(InstructionError::Custom(CONSTRAINT_HAS_ONE_ERROR));
        }
        self.base.remove(&tomo);
        self.base.remove(&crank_payer);
        Ok(())
    }
}

fn program_account(owner: Pubkey, data: Vec<u8>) -> Account {
    Account {
        lamports: 1_000_000,
        data,
        owner,
        executable: false,
        rent_epoch: 0,
    }
}

#[derive(Default)]
struct Faults {
    fail_reads: bool,
    fail_sends: bool,
    withhold_confirmations: bool,
    fail_reads_after_next_send: bool,
    blockhash_requests: usize,
    sent: Vec<Signature>,
}

/// One ledger's view of a [`SimulatedCluster`], with failure injection.
pub struct FakeLedger {
    cluster: SimulatedCluster,
    kind: LedgerKind,
    endpoint: String,
    faults: Mutex<Faults>,
}

impl FakeLedger {
    fn new(cluster: SimulatedCluster, kind: LedgerKind) -> Self {
        Self {
            cluster,
            kind,
            endpoint: format!("sim://{kind}"),
            faults: Mutex::new(Faults::default()),
        }
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.faults().fail_reads = fail;
    }

    pub fn fail_sends(&self, fail: bool) {
        self.faults().fail_sends = fail;
    }

    /// Transactions are accepted but never executed or confirmed.
    pub fn withhold_confirmations(&self, withhold: bool) {
        self.faults().withhold_confirmations = withhold;
    }

    /// Account reads start failing once the next transaction lands.
    pub fn fail_reads_after_next_send(&self, fail: bool) {
        self.faults().fail_reads_after_next_send = fail;
    }

    pub fn blockhash_requests(&self) -> usize {
        self.faults().blockhash_requests
    }

    pub fn sent_signatures(&self) -> Vec<Signature> {
        self.faults().sent.clone()
    }

    fn injected(&self, what: &str) -> Error {
        Error::ledger(self.endpoint.clone(), format!("injected {what} failure"))
    }
}

impl LedgerClient for FakeLedger {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>> {
        if self.faults().fail_reads {
            return Err(self.injected("read"));
        }
        Ok(self.cluster.account(self.kind, address))
    }

    async fn latest_blockhash(&self) -> Result<FreshnessToken> {
        self.faults().blockhash_requests += 1;
        Ok(self.cluster.issue_blockhash())
    }

    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature> {
        let mut faults = self.faults();
        if faults.fail_sends {
            return Err(self.injected("send"));
        }
        if transaction.verify().is_err() {
            return Err(Error::ledger(
                self.endpoint.clone(),
                "transaction signature verification failed",
            ));
        }
        let signature = transaction.signatures[0];
        faults.sent.push(signature);
        if !faults.withhold_confirmations {
            self.cluster.process(self.kind, transaction);
        }
        if faults.fail_reads_after_next_send {
            faults.fail_reads_after_next_send = false;
            faults.fail_reads = true;
        }
        Ok(signature)
    }

    async fn signature_status(&self, signature: &Signature) -> Result<TransactionStatus> {
        Ok(self.cluster.status(signature))
    }

    async fn block_height(&self) -> Result<u64> {
        Ok(self.cluster.advance_block())
    }
}

#[derive(Clone, Debug)]
pub enum ScriptedOutcome {
    Approve,
    Cancel,
    Fail(String),
}

/// Primary wallet stand-in that answers from a script.
pub struct FakeWallet {
    keypair: Option<Keypair>,
    default_outcome: ScriptedOutcome,
    script: Mutex<VecDeque<ScriptedOutcome>>,
    requests: Mutex<Vec<ChainDescriptor>>,
}

impl FakeWallet {
    fn with(keypair: Option<Keypair>, default_outcome: ScriptedOutcome) -> Self {
        Self {
            keypair,
            default_outcome,
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn approving() -> Self {
        Self::with(Some(Keypair::new()), ScriptedOutcome::Approve)
    }

    pub fn cancelling() -> Self {
        Self::with(Some(Keypair::new()), ScriptedOutcome::Cancel)
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self::with(Some(Keypair::new()), ScriptedOutcome::Fail(reason.into()))
    }

    pub fn disconnected() -> Self {
        Self::with(None, ScriptedOutcome::Approve)
    }

    /// Queues an answer for the next sign request only.
    pub fn push_outcome(&self, outcome: ScriptedOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn sign_requests(&self) -> Vec<ChainDescriptor> {
        self.requests.lock().unwrap().clone()
    }
}

impl ExternalWallet for FakeWallet {
    fn public_key(&self) -> Option<Pubkey> {
        self.keypair.as_ref().map(Keypair::pubkey)
    }

    async fn sign_transaction(
        &self,
        mut transaction: Transaction,
        chain: &ChainDescriptor,
    ) -> SignOutcome {
        self.requests.lock().unwrap().push(chain.clone());
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_outcome.clone());

        match (outcome, &self.keypair) {
            (ScriptedOutcome::Cancel, _) => SignOutcome::Cancelled,
            (ScriptedOutcome::Fail(reason), _) => SignOutcome::Failed(reason),
            (ScriptedOutcome::Approve, None) => SignOutcome::Failed("not connected".to_string()),
            (ScriptedOutcome::Approve, Some(keypair)) => {
                let blockhash: Hash = transaction.message.recent_blockhash;
                match transaction.try_sign(&[keypair], blockhash) {
                    Ok(()) => SignOutcome::Signed(transaction),
                    Err(err) => SignOutcome::Failed(err.to_string()),
                }
            }
        }
    }
}

pub type TestRouter = OperationRouter<FakeLedger, FakeLedger, FakeWallet, InMemorySecureStore>;

/// A router wired to a fresh simulated cluster.
pub struct TestContext {
    pub cluster: SimulatedCluster,
    pub base: Arc<FakeLedger>,
    pub rollup: Arc<FakeLedger>,
    pub wallet: Arc<FakeWallet>,
    pub store: InMemorySecureStore,
    pub router: TestRouter,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_wallet(FakeWallet::approving())
    }

    pub fn with_wallet(wallet: FakeWallet) -> Self {
        Self::with_parts(wallet, InMemorySecureStore::new())
    }

    /// Shares `store` with any earlier context, as a restarted app would.
    pub fn with_parts(wallet: FakeWallet, store: InMemorySecureStore) -> Self {
        let config = Self::config();
        let cluster = SimulatedCluster::with_deriver(config.deriver());
        let base = Arc::new(cluster.base());
        let rollup = Arc::new(cluster.rollup());
        let wallet = Arc::new(wallet);
        let router = OperationRouter::new(
            &config,
            Arc::clone(&base),
            Arc::clone(&rollup),
            Arc::clone(&wallet),
            store.clone(),
        );
        Self {
            cluster,
            base,
            rollup,
            wallet,
            store,
            router,
        }
    }

    pub fn config() -> ClusterConfig {
        ClusterConfig::for_network(Network::Local).with_confirm_poll_interval(Duration::ZERO)
    }

    pub fn owner(&self) -> Pubkey {
        self.wallet.public_key().unwrap()
    }
}
