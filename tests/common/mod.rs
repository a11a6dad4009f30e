//! Deterministic doubles for every external party: auth client, injected
//! wallet, remote signer, BTC wallet SDK, sign-in service and RPC layer.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use beeconnect::actor::{RequestSignature, SignedEnvelope};
use beeconnect::btc::BtcAccount;
use beeconnect::connector::{AuthClient, ConnectorContext, InjectedWallet, LoginOptions, SignerAccount, SignerChannel, SignerTransport};
use beeconnect::identity::{Delegation, DelegationChain, SessionKey, SignedDelegation};
use beeconnect::siwb::{Challenge, LoginRequest, LoginResponse};
use beeconnect::{
    BtcFacade, BtcNetwork, BtcProviderKind, BtcWallet, ConnectConfig, ConnectError, ConnectResult, DelegatedIdentity,
    LedgerBackends, MemoryStorage, Principal, RequestSigner, RpcTransport, ServiceDescriptor, SessionHub,
    SessionStorage, SiwbService,
};

pub const ADDR_1: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";
pub const ADDR_2: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";
pub const BTC_PUBKEY: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

pub fn ii_principal() -> Principal {
    Principal::self_authenticating(b"ii user")
}

pub fn plug_principal() -> Principal {
    Principal::self_authenticating(b"plug user")
}

pub fn oisy_principal() -> Principal {
    Principal::self_authenticating(b"oisy user")
}

/// Principal the fake sign-in service issues for `address`.
pub fn siwb_principal(address: &str) -> Principal {
    Principal::self_authenticating(format!("siwb:{address}").as_bytes())
}

pub fn canister() -> Principal {
    Principal::from_slice(&[0, 0, 0, 0, 0, 0x30, 0, 0x01, 0x01, 0x01]).expect("canister id")
}

pub fn ledger_service() -> Arc<ServiceDescriptor> {
    Arc::new(ServiceDescriptor::new("ledger").query("balance").update("transfer"))
}

pub fn config() -> ConnectConfig {
    ConnectConfig::new("beeconnect-test").with_whitelist(vec![canister()])
}

/// Context for driving a connector directly, without the manager.
pub fn context(storage: Arc<dyn SessionStorage>) -> ConnectorContext {
    ConnectorContext {
        config: Arc::new(config()),
        storage,
        transport: Arc::new(RecordingTransport::default()),
    }
}

pub fn make_identity(user_key: &[u8], ttl: chrono::Duration) -> DelegatedIdentity {
    let session_key = SessionKey::generate();
    let chain = DelegationChain {
        user_public_key: user_key.to_vec(),
        delegations: vec![SignedDelegation {
            delegation: Delegation { pubkey: session_key.public_key(), expiration: Utc::now() + ttl, targets: None },
            signature: vec![0x5a; 64],
        }],
    };
    DelegatedIdentity::new(session_key, chain).expect("identity")
}

// =============================================================================
// RPC layer
// =============================================================================

#[derive(Default)]
pub struct RecordingTransport {
    pub calls: Mutex<Vec<SignedEnvelope>>,
}

#[async_trait]
impl RpcTransport for RecordingTransport {
    async fn submit(&self, _host: &str, envelope: SignedEnvelope) -> ConnectResult<Value> {
        let method = envelope.content.method.clone();
        self.calls.lock().unwrap().push(envelope);
        Ok(json!({ "reply": method }))
    }
}

/// Signs with a local key on behalf of a fixed principal.
#[derive(Debug)]
pub struct KeySigner {
    principal: Principal,
    key: SessionKey,
}

impl KeySigner {
    pub fn new(principal: Principal) -> Self {
        Self { principal, key: SessionKey::generate() }
    }
}

#[async_trait]
impl RequestSigner for KeySigner {
    fn principal(&self) -> Principal {
        self.principal.clone()
    }

    async fn sign(&self, content: &[u8]) -> ConnectResult<RequestSignature> {
        Ok(RequestSignature { public_key: self.key.public_key(), signature: self.key.sign(content)?, delegations: vec![] })
    }
}

// =============================================================================
// Delegated identity: auth client
// =============================================================================

pub struct FakeAuthClient {
    user_key: Vec<u8>,
    ttl: Mutex<chrono::Duration>,
    identity: Mutex<Option<Arc<DelegatedIdentity>>>,
    pub reject: AtomicBool,
    pub logins: AtomicUsize,
    pub logouts: AtomicUsize,
}

impl FakeAuthClient {
    pub fn new(user_key: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            user_key: user_key.to_vec(),
            ttl: Mutex::new(chrono::Duration::hours(1)),
            identity: Mutex::new(None),
            reject: AtomicBool::new(false),
            logins: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
        })
    }

    pub fn set_ttl(&self, ttl: chrono::Duration) {
        *self.ttl.lock().unwrap() = ttl;
    }

    /// Simulates the client's own storage holding a session from a previous page load.
    pub fn preauthenticate(&self) {
        let ttl = *self.ttl.lock().unwrap();
        *self.identity.lock().unwrap() = Some(Arc::new(make_identity(&self.user_key, ttl)));
    }
}

#[async_trait]
impl AuthClient for FakeAuthClient {
    async fn is_authenticated(&self) -> bool {
        self.identity.lock().unwrap().is_some()
    }

    async fn identity(&self) -> Option<Arc<DelegatedIdentity>> {
        self.identity.lock().unwrap().clone()
    }

    async fn login(&self, _options: &LoginOptions) -> ConnectResult<()> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if self.reject.load(Ordering::SeqCst) {
            return Err(ConnectError::ConsentRejected);
        }
        self.preauthenticate();
        Ok(())
    }

    async fn logout(&self) -> ConnectResult<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        *self.identity.lock().unwrap() = None;
        Ok(())
    }
}

// =============================================================================
// Injected provider
// =============================================================================

#[derive(Clone)]
struct PlugState {
    unlocked: bool,
    connected: bool,
    probe_hangs: bool,
    approve: bool,
    consent_delay: Duration,
    disconnect_hangs: bool,
}

pub struct FakePlug {
    principal: Mutex<Principal>,
    state: Mutex<PlugState>,
    pub prompts: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl FakePlug {
    pub fn new(principal: Principal) -> Arc<Self> {
        Arc::new(Self {
            principal: Mutex::new(principal),
            state: Mutex::new(PlugState {
                unlocked: false,
                connected: false,
                probe_hangs: false,
                approve: true,
                consent_delay: Duration::ZERO,
                disconnect_hangs: false,
            }),
            prompts: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        })
    }

    /// Locked extension: the connectivity probe waits on a popup nobody answers.
    pub fn lock(&self) {
        let mut state = self.state.lock().unwrap();
        state.unlocked = false;
        state.probe_hangs = true;
    }

    /// Already authorized for this page and unlocked.
    pub fn authorize(&self) {
        let mut state = self.state.lock().unwrap();
        state.unlocked = true;
        state.connected = true;
        state.probe_hangs = false;
    }

    pub fn reject_consent(&self) {
        self.state.lock().unwrap().approve = false;
    }

    pub fn set_consent_delay(&self, delay: Duration) {
        self.state.lock().unwrap().consent_delay = delay;
    }

    /// The extension never answers a disconnect and keeps its authorization.
    pub fn hang_disconnect(&self) {
        self.state.lock().unwrap().disconnect_hangs = true;
    }

    pub fn set_principal(&self, principal: Principal) {
        *self.principal.lock().unwrap() = principal;
    }

    fn snapshot(&self) -> PlugState {
        self.state.lock().unwrap().clone()
    }
}

#[async_trait]
impl InjectedWallet for FakePlug {
    fn is_unlocked(&self) -> bool {
        self.snapshot().unlocked
    }

    async fn is_connected(&self) -> bool {
        let state = self.snapshot();
        if state.probe_hangs {
            return std::future::pending::<bool>().await;
        }
        state.connected
    }

    async fn request_connect(&self, _whitelist: &[Principal], _host: &str) -> ConnectResult<()> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        let state = self.snapshot();
        if !state.consent_delay.is_zero() {
            tokio::time::sleep(state.consent_delay).await;
        }
        if !state.approve {
            return Err(ConnectError::ConsentRejected);
        }
        self.authorize();
        Ok(())
    }

    async fn principal(&self) -> ConnectResult<Principal> {
        if !self.snapshot().connected {
            return Err(ConnectError::NotConnected);
        }
        Ok(self.principal.lock().unwrap().clone())
    }

    async fn create_agent(&self, _whitelist: &[Principal], _host: &str) -> ConnectResult<Arc<dyn RequestSigner>> {
        let principal = self.principal.lock().unwrap().clone();
        Ok(Arc::new(KeySigner::new(principal)))
    }

    async fn disconnect(&self) -> ConnectResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.snapshot().disconnect_hangs {
            return std::future::pending::<ConnectResult<()>>().await;
        }
        let mut state = self.state.lock().unwrap();
        state.connected = false;
        Ok(())
    }
}

// =============================================================================
// Remote signer
// =============================================================================

#[derive(Debug)]
pub struct FakeChannel {
    accounts: Vec<SignerAccount>,
    key: SessionKey,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl SignerChannel for FakeChannel {
    async fn accounts(&self) -> ConnectResult<Vec<SignerAccount>> {
        Ok(self.accounts.clone())
    }

    async fn sign(&self, _owner: &Principal, content: &[u8]) -> ConnectResult<RequestSignature> {
        Ok(RequestSignature { public_key: self.key.public_key(), signature: self.key.sign(content)?, delegations: vec![] })
    }

    async fn close(&self) -> ConnectResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeSignerTransport {
    accounts: Mutex<Vec<SignerAccount>>,
    pub hang: AtomicBool,
    pub establishes: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
}

impl FakeSignerTransport {
    pub fn new(owner: Principal) -> Arc<Self> {
        Arc::new(Self {
            accounts: Mutex::new(vec![SignerAccount { owner }]),
            hang: AtomicBool::new(false),
            establishes: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn set_accounts(&self, accounts: Vec<SignerAccount>) {
        *self.accounts.lock().unwrap() = accounts;
    }
}

#[async_trait]
impl SignerTransport for FakeSignerTransport {
    async fn establish(&self) -> ConnectResult<Arc<dyn SignerChannel>> {
        self.establishes.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        let accounts = self.accounts.lock().unwrap().clone();
        Ok(Arc::new(FakeChannel { accounts, key: SessionKey::generate(), closes: self.closes.clone() }))
    }
}

// =============================================================================
// BTC wallet SDK
// =============================================================================

#[derive(Clone)]
struct WalletState {
    address: String,
    network: BtcNetwork,
    authorized: bool,
    locked: bool,
}

pub struct FakeBtcWallet {
    state: Mutex<WalletState>,
    pub signs: AtomicUsize,
    pub reject_sign: AtomicBool,
}

impl FakeBtcWallet {
    pub fn new(address: &str) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(WalletState {
                address: address.to_string(),
                network: BtcNetwork::Mainnet,
                authorized: false,
                locked: false,
            }),
            signs: AtomicUsize::new(0),
            reject_sign: AtomicBool::new(false),
        })
    }

    /// The user picked another account inside the wallet.
    pub fn switch_address(&self, address: &str) {
        self.state.lock().unwrap().address = address.to_string();
    }

    pub fn switch_network(&self, network: BtcNetwork) {
        self.state.lock().unwrap().network = network;
    }

    pub fn lock(&self) {
        self.state.lock().unwrap().locked = true;
    }

    pub fn authorize(&self) {
        self.state.lock().unwrap().authorized = true;
    }

    pub fn unlock(&self) {
        self.state.lock().unwrap().locked = false;
    }

    pub fn signs(&self) -> usize {
        self.signs.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> WalletState {
        self.state.lock().unwrap().clone()
    }
}

#[async_trait]
impl BtcWallet for FakeBtcWallet {
    async fn request_accounts(&self) -> ConnectResult<BtcAccount> {
        let mut state = self.state.lock().unwrap();
        state.authorized = true;
        state.locked = false;
        Ok(BtcAccount { address: state.address.clone(), public_key: BTC_PUBKEY.to_string() })
    }

    async fn get_address(&self) -> ConnectResult<Option<String>> {
        let state = self.snapshot();
        Ok((state.authorized && !state.locked).then_some(state.address))
    }

    async fn get_public_key(&self) -> ConnectResult<String> {
        Ok(BTC_PUBKEY.to_string())
    }

    async fn network(&self) -> ConnectResult<BtcNetwork> {
        Ok(self.snapshot().network)
    }

    async fn sign_message(&self, address: &str, message: &str) -> ConnectResult<String> {
        self.signs.fetch_add(1, Ordering::SeqCst);
        if self.reject_sign.load(Ordering::SeqCst) {
            return Err(ConnectError::ConsentRejected);
        }
        Ok(base64::engine::general_purpose::STANDARD.encode(format!("sig:{address}:{message}")))
    }

    async fn send_payment(&self, _to: &str, amount_sats: u64) -> ConnectResult<String> {
        Ok(format!("{amount_sats:064x}"))
    }

    async fn disconnect(&self) -> ConnectResult<()> {
        self.state.lock().unwrap().authorized = false;
        Ok(())
    }
}

// =============================================================================
// Sign-in service
// =============================================================================

pub struct FakeSiwb {
    prepare_delay: Mutex<Duration>,
    pub prepares: AtomicUsize,
    pub logins: AtomicUsize,
    pub fail_login: AtomicBool,
    pub ttl: chrono::Duration,
}

impl FakeSiwb {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            prepare_delay: Mutex::new(Duration::ZERO),
            prepares: AtomicUsize::new(0),
            logins: AtomicUsize::new(0),
            fail_login: AtomicBool::new(false),
            ttl: chrono::Duration::hours(1),
        })
    }

    pub fn set_prepare_delay(&self, delay: Duration) {
        *self.prepare_delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl SiwbService for FakeSiwb {
    async fn prepare_login(&self, address: &str) -> ConnectResult<Challenge> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        let delay = *self.prepare_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(Challenge {
            address: address.to_string(),
            message: format!("Sign in to beeconnect-test as {address}"),
            expires_at: Some(Utc::now() + chrono::Duration::minutes(5)),
        })
    }

    async fn login(&self, request: &LoginRequest) -> ConnectResult<LoginResponse> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if self.fail_login.load(Ordering::SeqCst) {
            return Err(ConnectError::Exchange("signature verification failed".into()));
        }
        let expected = format!("sig:{}:", request.address);
        if !request.signature.starts_with(expected.as_bytes()) {
            return Err(ConnectError::Exchange("signature does not match address".into()));
        }
        Ok(LoginResponse {
            user_public_key: format!("siwb:{}", request.address).into_bytes(),
            expiration: Utc::now() + self.ttl,
        })
    }

    async fn get_delegation(
        &self,
        _address: &str,
        session_key: &[u8],
        expiration: DateTime<Utc>,
    ) -> ConnectResult<SignedDelegation> {
        Ok(SignedDelegation {
            delegation: Delegation { pubkey: session_key.to_vec(), expiration, targets: None },
            signature: vec![0x11; 64],
        })
    }
}

// =============================================================================
// Wiring
// =============================================================================

/// External parties outlive a page load; a reload builds a new hub around the same doubles.
#[derive(Clone)]
pub struct Doubles {
    pub ii: Arc<FakeAuthClient>,
    pub plug: Arc<FakePlug>,
    pub oisy: Arc<FakeSignerTransport>,
    pub unisat: Arc<FakeBtcWallet>,
    pub siwb: Arc<FakeSiwb>,
    pub rpc: Arc<RecordingTransport>,
}

impl Doubles {
    pub fn new() -> Self {
        Self {
            ii: FakeAuthClient::new(b"ii user"),
            plug: FakePlug::new(plug_principal()),
            oisy: FakeSignerTransport::new(oisy_principal()),
            unisat: FakeBtcWallet::new(ADDR_1),
            siwb: FakeSiwb::new(),
            rpc: Arc::new(RecordingTransport::default()),
        }
    }

    pub fn backends(&self) -> LedgerBackends {
        LedgerBackends::new(self.rpc.clone())
            .with_auth_client(self.ii.clone())
            .with_injected(self.plug.clone())
            .with_signer(self.oisy.clone())
    }

    pub fn facade(&self) -> BtcFacade {
        BtcFacade::new().with_wallet(BtcProviderKind::Unisat, self.unisat.clone())
    }

    pub fn hub(&self, storage: Arc<dyn SessionStorage>, config: ConnectConfig) -> SessionHub {
        SessionHub::new(config, storage, self.backends(), self.facade(), self.siwb.clone())
    }
}

pub struct Harness {
    pub storage: Arc<dyn SessionStorage>,
    pub doubles: Doubles,
    pub hub: SessionHub,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: ConnectConfig) -> Self {
        let storage: Arc<dyn SessionStorage> = Arc::new(MemoryStorage::new());
        let doubles = Doubles::new();
        let hub = doubles.hub(storage.clone(), config);
        Self { storage, doubles, hub }
    }

    /// Simulated page reload: same storage, same external parties, fresh hub.
    pub fn reload(&self) -> SessionHub {
        self.doubles.hub(self.storage.clone(), config())
    }
}
