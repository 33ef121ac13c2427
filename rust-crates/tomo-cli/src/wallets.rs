use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use eth_keystore::decrypt_key;
use rpassword::prompt_password;
use solana_sdk::{
    derivation_path::DerivationPath,
    pubkey::Pubkey,
    signature::Keypair,
    signer::{
        Signer,
        keypair::{
            generate_seed_from_seed_phrase_and_passphrase,
            keypair_from_seed,
            keypair_from_seed_and_derivation_path,
            read_keypair_file,
        },
    },
    transaction::Transaction,
};
use std::{
    fs,
    io::{
        self,
        BufRead,
        Write,
    },
    path::{
        Path,
        PathBuf,
    },
};
use tomo_client::wallet::{
    ChainDescriptor,
    ExternalWallet,
    SignOutcome,
};
use tracing::{
    debug,
    info,
};

#[derive(Clone, Debug)]
pub struct WalletDescriptor {
    pub name: String,
    pub path: PathBuf,
}

impl WalletDescriptor {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }
}

pub fn default_wallet_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").wrap_err("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".tomo").join("wallets"))
}

pub fn resolve_wallet_dir(dir: Option<&str>) -> Result<PathBuf> {
    match dir {
        Some(raw) => {
            let expanded = shellexpand::tilde(raw);
            Ok(PathBuf::from(expanded.into_owned()))
        }
        None => default_wallet_dir(),
    }
}

pub fn list_wallets(dir: &Path) -> Result<Vec<WalletDescriptor>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut wallets = Vec::new();
    for entry in fs::read_dir(dir).wrap_err("Failed to read wallet directory")? {
        let entry = entry.wrap_err("Failed to read wallet entry")?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some("wallet") {
            continue;
        }
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| eyre!("Invalid wallet filename {:?}", path))?
            .to_owned();
        wallets.push(WalletDescriptor::new(name, path));
    }
    wallets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(wallets)
}

pub fn find_wallet(dir: &Path, name: &str) -> Result<WalletDescriptor> {
    let wallets = list_wallets(dir)?;
    wallets
        .into_iter()
        .find(|w| w.name == name)
        .ok_or_else(|| eyre!("Wallet '{name}' not found in {}", dir.to_string_lossy()))
}

pub fn unlock_wallet(descriptor: &WalletDescriptor) -> Result<Keypair> {
    let prompt = format!("Enter password for wallet '{}': ", descriptor.name);
    let password = prompt_password(prompt).wrap_err("Failed to read wallet password")?;

    let secret = decrypt_key(&descriptor.path, password.as_bytes())
        .map_err(|_| eyre!("Invalid password for wallet '{}'", descriptor.name))?;

    keypair_from_secret(&secret).wrap_err_with(|| {
        format!("Wallet '{}' contained unsupported key material", descriptor.name)
    })
}

/// Accepts a full 64-byte keypair, a 32-byte seed, or a seed phrase of 12+ words.
pub fn keypair_from_secret(secret: &[u8]) -> Result<Keypair> {
    match secret.len() {
        64 => {
            return Keypair::from_bytes(secret)
                .map_err(|e| eyre!("Invalid 64-byte keypair: {e}"));
        }
        32 => {
            return keypair_from_seed(secret)
                .map_err(|e| eyre!("Invalid 32-byte seed: {e}"));
        }
        _ => {}
    }

    if let Ok(mnemonic) = std::str::from_utf8(secret) {
        let word_count = mnemonic.split_whitespace().count();
        if word_count >= 12 {
            let seed = generate_seed_from_seed_phrase_and_passphrase(mnemonic, "");
            let path = DerivationPath::new_bip44(Some(0), Some(0));
            return keypair_from_seed_and_derivation_path(&seed, Some(path))
                .map_err(|e| eyre!("Failed to derive key from seed phrase: {e}"));
        }
    }

    Err(eyre!("Unsupported secret of {} bytes", secret.len()))
}

/// Reads a keypair in the Solana CLI JSON format (an array of 64 bytes).
pub fn load_keypair_file(path: &str) -> Result<Keypair> {
    let expanded = shellexpand::tilde(path).into_owned();
    read_keypair_file(&expanded)
        .map_err(|e| eyre!("Failed to read keypair file {expanded}: {e}"))
}

/// The primary wallet backed by a key held in this process.
///
/// Every signature is confirmed on the terminal unless `auto_approve` is set.
pub struct KeystoreWallet {
    keypair: Option<Keypair>,
    auto_approve: bool,
}

impl KeystoreWallet {
    pub fn new(keypair: Keypair, auto_approve: bool) -> Self {
        Self {
            keypair: Some(keypair),
            auto_approve,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            keypair: None,
            auto_approve: false,
        }
    }

    async fn approved(&self, chain: &ChainDescriptor) -> Result<bool> {
        if self.auto_approve {
            return Ok(true);
        }
        let question = format!(
            "{} ({}) requests a signature on {}. Approve? [y/N] ",
            chain.app_name, chain.app_uri, chain.chain_id
        );
        confirm(question, false).await
    }
}

/// Asks a y/N question on the terminal. `assume_yes` answers it without asking.
pub async fn confirm(question: String, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    tokio::task::spawn_blocking(move || ask(&question))
        .await
        .wrap_err("Approval prompt did not complete")?
}

fn ask(question: &str) -> Result<bool> {
    let mut stdout = io::stdout();
    stdout.write_all(question.as_bytes())?;
    stdout.flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

impl ExternalWallet for KeystoreWallet {
    fn public_key(&self) -> Option<Pubkey> {
        self.keypair.as_ref().map(|keypair| keypair.pubkey())
    }

    async fn sign_transaction(
        &self,
        mut transaction: Transaction,
        chain: &ChainDescriptor,
    ) -> SignOutcome {
        let Some(keypair) = self.keypair.as_ref() else {
            return SignOutcome::Failed("no wallet connected".to_string());
        };
        match self.approved(chain).await {
            Ok(true) => {}
            Ok(false) => {
                info!("signature request declined");
                return SignOutcome::Cancelled;
            }
            Err(e) => return SignOutcome::Failed(e.to_string()),
        }
        let blockhash = transaction.message.recent_blockhash;
        match transaction.try_sign(&[keypair], blockhash) {
            Ok(()) => {
                debug!(signer = %keypair.pubkey(), "transaction signed by primary wallet");
                SignOutcome::Signed(transaction)
            }
            Err(e) => SignOutcome::Failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use solana_sdk::{
        hash::Hash,
        instruction::{
            AccountMeta,
            Instruction,
        },
        message::Message,
        signer::keypair::write_keypair_file,
    };
    use tempdir::TempDir;

    fn unsigned_from(payer: &Pubkey) -> Transaction {
        let instruction = Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[1],
            vec![AccountMeta::new(*payer, true)],
        );
        let message = Message::new_with_blockhash(&[instruction], Some(payer), &Hash::new_unique());
        Transaction::new_unsigned(message)
    }

    #[test]
    fn list_wallets__mixed_entries__only_wallet_files_sorted() {
        // given
        let dir = TempDir::new("tomo_wallets").unwrap();
        fs::write(dir.path().join("zeta.wallet"), b"{}").unwrap();
        fs::write(dir.path().join("alpha.wallet"), b"{}").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();
        fs::create_dir(dir.path().join("nested.wallet")).unwrap();

        // when
        let wallets = list_wallets(dir.path()).unwrap();

        // then
        let names: Vec<_> = wallets.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn list_wallets__missing_dir__empty() {
        let dir = TempDir::new("tomo_wallets_missing").unwrap();
        let wallets = list_wallets(&dir.path().join("absent")).unwrap();
        assert!(wallets.is_empty());
    }

    #[test]
    fn find_wallet__unknown_name__error_names_wallet() {
        let dir = TempDir::new("tomo_wallets_find").unwrap();
        let err = find_wallet(dir.path(), "ghost").unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn keypair_from_secret__full_keypair__same_key() {
        // given
        let original = Keypair::new();

        // when
        let restored = keypair_from_secret(&original.to_bytes()).unwrap();

        // then
        assert_eq!(restored.pubkey(), original.pubkey());
    }

    #[test]
    fn keypair_from_secret__seed__deterministic() {
        let first = keypair_from_secret(&[7u8; 32]).unwrap();
        let second = keypair_from_secret(&[7u8; 32]).unwrap();
        assert_eq!(first.pubkey(), second.pubkey());
    }

    #[test]
    fn keypair_from_secret__seed_phrase__deterministic() {
        let phrase = "abandon abandon abandon abandon abandon abandon \
                      abandon abandon abandon abandon abandon about";
        let first = keypair_from_secret(phrase.as_bytes()).unwrap();
        let second = keypair_from_secret(phrase.as_bytes()).unwrap();
        assert_eq!(first.pubkey(), second.pubkey());
    }

    #[test]
    fn keypair_from_secret__short_phrase__error() {
        assert!(keypair_from_secret(b"too few words").is_err());
    }

    #[test]
    fn load_keypair_file__solana_json__same_key() {
        // given
        let dir = TempDir::new("tomo_keypair").unwrap();
        let path = dir.path().join("id.json");
        let original = Keypair::new();
        write_keypair_file(&original, &path).unwrap();

        // when
        let loaded = load_keypair_file(path.to_str().unwrap()).unwrap();

        // then
        assert_eq!(loaded.pubkey(), original.pubkey());
    }

    #[test]
    fn is_yes__accepts_only_affirmatives() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
    }

    #[tokio::test]
    async fn confirm__assume_yes__approved_without_prompt() {
        let approved = confirm("Clear everything? [y/N] ".to_string(), true)
            .await
            .unwrap();
        assert!(approved);
    }

    #[tokio::test]
    async fn sign_transaction__auto_approve__signed_by_wallet_key() {
        // given
        let keypair = Keypair::new();
        let payer = keypair.pubkey();
        let wallet = KeystoreWallet::new(keypair, true);
        let chain = tomo_client::config::ClusterConfig::for_network(
            tomo_client::config::Network::Local,
        )
        .chain;

        // when
        let outcome = wallet.sign_transaction(unsigned_from(&payer), &chain).await;

        // then
        let SignOutcome::Signed(signed) = outcome else {
            panic!("expected a signed transaction, got {outcome:?}");
        };
        assert!(signed.is_signed());
        assert!(signed.verify().is_ok());
    }

    #[tokio::test]
    async fn sign_transaction__disconnected__failed_without_key() {
        // given
        let wallet = KeystoreWallet::disconnected();
        let chain = tomo_client::config::ClusterConfig::for_network(
            tomo_client::config::Network::Local,
        )
        .chain;

        // when
        let outcome = wallet
            .sign_transaction(unsigned_from(&Pubkey::new_unique()), &chain)
            .await;

        // then
        assert_eq!(wallet.public_key(), None);
        assert!(matches!(outcome, SignOutcome::Failed(_)));
    }
}
