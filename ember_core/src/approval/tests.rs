use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::task::LocalSet;

use super::*;
use crate::broker::{run, Broker, BrokerHandle, DeferredReply, ExtensionHost, Reply, SenderInfo};
use crate::models::PendingRequest;
use crate::protocol::BroadcastEvent;
use crate::scheduler::{expiry_channel, Clock, Scheduler, TimeoutHandle};
use crate::settings::Settings;
use crate::storage_trait::MemoryStorage;

const DAPP: &str = "https://dapp.test";
const ADDRESS: &str = "0xabc0000000000000000000000000000000000001";
const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe512961708279f8b1a3a7c6b1b5e1f0";

struct QuietHost;

impl ExtensionHost for QuietHost {
    fn broadcast(&self, _event: &BroadcastEvent) {}
    fn notify_pending(&self, _request: &PendingRequest, _queue_len: usize) {}
}

struct NeverFires;

impl Scheduler for NeverFires {
    fn schedule(&self, _request_id: &str, _ttl: Duration) -> TimeoutHandle {
        TimeoutHandle::detached()
    }
}

struct FixedClock;

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        1_700_000_000_000
    }
}

#[derive(Default)]
struct FakeSigner {
    fail_sends: bool,
    sent: Rc<RefCell<Vec<(String, String, String, String)>>>,
}

#[async_trait(?Send)]
impl Signer for FakeSigner {
    async fn create_wallet(&self) -> Result<WalletKeys, CoreError> {
        Ok(WalletKeys {
            address: ADDRESS.to_string(),
            private_key: KEY.to_string(),
            mnemonic: Some("test test test test test test test test test test test junk".to_string()),
        })
    }

    async fn connect_with_key(&self, private_key: &str) -> Result<String, CoreError> {
        if private_key.starts_with("0x") {
            Ok(ADDRESS.to_string())
        } else {
            Err(CoreError::Signer("not a hex key".to_string()))
        }
    }

    async fn send_token(&self, private_key: &str, to: &str, amount: &str, chain_id: &str) -> Result<String, CoreError> {
        if self.fail_sends {
            return Err(CoreError::Signer("insufficient funds".to_string()));
        }
        self.sent.borrow_mut().push((private_key.into(), to.into(), amount.into(), chain_id.into()));
        Ok("0xhash".to_string())
    }

    async fn get_balance(&self, address: &str, chain_id: &str) -> Result<String, CoreError> {
        Ok(format!("{}@{}", address, chain_id))
    }

    async fn estimate_gas(&self, chain_id: &str) -> Result<String, CoreError> {
        Ok(format!("21000@{}", chain_id))
    }
}

#[derive(Default)]
struct FakeSecrets(RefCell<Option<(String, String)>>);

#[async_trait(?Send)]
impl SecretStore for FakeSecrets {
    async fn save(&self, blob: &str, password: &str) -> Result<(), CoreError> {
        *self.0.borrow_mut() = Some((blob.to_string(), password.to_string()));
        Ok(())
    }

    async fn load(&self, password: &str) -> Result<Option<String>, CoreError> {
        Ok(self
            .0
            .borrow()
            .as_ref()
            .filter(|(_, stored)| stored == password)
            .map(|(blob, _)| blob.clone()))
    }

    async fn exists(&self) -> Result<bool, CoreError> {
        Ok(self.0.borrow().is_some())
    }
}

type Surface = ApprovalSurface<BrokerHandle, FakeSigner, FakeSecrets>;

/// Start a broker task on the current `LocalSet` and hand back a page-side
/// handle plus the surface wired to it.
async fn start(signer: FakeSigner) -> (BrokerHandle, Surface) {
    let (handle, commands) = BrokerHandle::channel();
    let (expiry_tx, expiry_rx) = expiry_channel();
    let broker = Broker::load(
        MemoryStorage::new(),
        &Settings::default(),
        Box::new(QuietHost),
        Box::new(NeverFires),
        Box::new(FixedClock),
    )
    .await;
    tokio::task::spawn_local(async move {
        let _keep = expiry_tx;
        run(broker, commands, expiry_rx).await;
    });
    let surface = ApprovalSurface::new(handle.clone(), signer, FakeSecrets::default());
    (handle, surface)
}

async fn page_send(handle: &BrokerHandle, envelope: Envelope) -> DeferredReply {
    match handle.dispatch(envelope.with_origin(DAPP), SenderInfo::page(DAPP)).await.unwrap() {
        Reply::Later(deferred) => deferred,
        other => panic!("expected a deferred reply, got {:?}", other),
    }
}

async fn connect_page(handle: &BrokerHandle, surface: &Surface) {
    let deferred = page_send(handle, Envelope::new(MessageKind::Connect)).await;
    surface.approve_connection(&deferred.request_id, DAPP, false).await.unwrap();
    assert_eq!(deferred.wait().await.unwrap().result, Some(json!([ADDRESS])));
}

async fn send_transaction(handle: &BrokerHandle) -> DeferredReply {
    let tx = json!({"from": ADDRESS, "to": "0xdef", "value": "0x2386f26fc10000"});
    page_send(
        handle,
        Envelope::new(MessageKind::Request)
            .with_method("eth_sendTransaction")
            .with_params(vec![tx]),
    )
    .await
}

#[tokio::test]
async fn create_wallet_stores_keys_and_unlocks() {
    LocalSet::new()
        .run_until(async {
            let (_handle, surface) = start(FakeSigner::default()).await;
            assert!(!surface.has_wallet().await.unwrap());

            let keys = surface.create_wallet("hunter2").await.unwrap();
            assert_eq!(keys.address, ADDRESS);
            assert!(surface.has_wallet().await.unwrap());

            let state = surface.state().await.unwrap();
            assert!(state.is_unlocked);
            assert_eq!(state.accounts, vec![ADDRESS.to_string()]);

            surface.lock().await.unwrap();
            assert!(!surface.state().await.unwrap().is_unlocked);
            assert_eq!(surface.unlock("hunter2").await.unwrap(), ADDRESS);
            assert!(surface.state().await.unwrap().is_unlocked);
        })
        .await;
}

#[tokio::test]
async fn wrong_password_does_not_unlock() {
    LocalSet::new()
        .run_until(async {
            let (_handle, surface) = start(FakeSigner::default()).await;
            surface.import_wallet(KEY, "right").await.unwrap();
            surface.lock().await.unwrap();

            assert!(matches!(surface.unlock("wrong").await, Err(CoreError::Validation(_))));
            assert!(!surface.state().await.unwrap().is_unlocked);
        })
        .await;
}

#[tokio::test]
async fn import_rejects_key_the_signer_refuses() {
    LocalSet::new()
        .run_until(async {
            let (_handle, surface) = start(FakeSigner::default()).await;
            assert!(matches!(surface.import_wallet("garbage", "pw").await, Err(CoreError::Signer(_))));
            assert!(!surface.has_wallet().await.unwrap());
        })
        .await;
}

#[tokio::test]
async fn approved_transaction_is_signed_and_page_gets_hash() {
    LocalSet::new()
        .run_until(async {
            let signer = FakeSigner::default();
            let sent = signer.sent.clone();
            let (handle, surface) = start(signer).await;
            surface.import_wallet(KEY, "pw").await.unwrap();
            connect_page(&handle, &surface).await;

            let deferred = send_transaction(&handle).await;
            let queued = surface.pending_requests().await.unwrap();
            assert_eq!(queued.len(), 1);
            assert_eq!(queued[0].id, deferred.request_id);

            let hash = surface.approve_transaction(&deferred.request_id, "pw").await.unwrap();
            assert_eq!(hash, "0xhash");

            let response = deferred.wait().await.unwrap();
            assert!(response.success);
            assert_eq!(response.result, Some(json!("0xhash")));
            assert_eq!(
                sent.borrow().as_slice(),
                &[(KEY.to_string(), "0xdef".to_string(), "0x2386f26fc10000".to_string(), "0x1".to_string())]
            );
            assert!(surface.pending_requests().await.unwrap().is_empty());
        })
        .await;
}

#[tokio::test]
async fn signer_failure_rejects_with_internal_error() {
    LocalSet::new()
        .run_until(async {
            let (handle, surface) = start(FakeSigner { fail_sends: true, ..Default::default() }).await;
            surface.import_wallet(KEY, "pw").await.unwrap();
            connect_page(&handle, &surface).await;

            let deferred = send_transaction(&handle).await;
            let outcome = surface.approve_transaction(&deferred.request_id, "pw").await;
            assert!(matches!(outcome, Err(CoreError::Signer(_))));

            let error = deferred.wait().await.unwrap().error.unwrap();
            assert_eq!(error.code.code(), -32603);
            assert!(error.message.contains("insufficient funds"));
        })
        .await;
}

#[tokio::test]
async fn non_transfer_requests_need_an_explicit_result() {
    LocalSet::new()
        .run_until(async {
            let (handle, surface) = start(FakeSigner::default()).await;
            surface.import_wallet(KEY, "pw").await.unwrap();
            connect_page(&handle, &surface).await;

            let deferred = page_send(
                &handle,
                Envelope::new(MessageKind::Request)
                    .with_method("personal_sign")
                    .with_params(vec![json!("0x68656c6c6f"), json!(ADDRESS)]),
            )
            .await;

            let refused = surface.approve_transaction(&deferred.request_id, "pw").await;
            assert!(matches!(refused, Err(CoreError::InvalidInput(_))));

            surface.approve_with_result(&deferred.request_id, json!("0xsig")).await.unwrap();
            assert_eq!(deferred.wait().await.unwrap().result, Some(json!("0xsig")));
        })
        .await;
}

#[tokio::test]
async fn rejecting_a_transaction_reports_user_rejection() {
    LocalSet::new()
        .run_until(async {
            let (handle, surface) = start(FakeSigner::default()).await;
            surface.import_wallet(KEY, "pw").await.unwrap();
            connect_page(&handle, &surface).await;

            let deferred = send_transaction(&handle).await;
            let request_id = deferred.request_id.clone();
            surface.reject_transaction(&request_id).await.unwrap();
            assert_eq!(deferred.wait().await.unwrap().error.unwrap().code.code(), 4001);

            let again = surface.reject_transaction(&request_id).await;
            assert!(matches!(again, Err(CoreError::Rpc(_))));
        })
        .await;
}

#[tokio::test]
async fn site_management_round_trips_through_the_broker() {
    LocalSet::new()
        .run_until(async {
            let (handle, surface) = start(FakeSigner::default()).await;
            surface.import_wallet(KEY, "pw").await.unwrap();
            connect_page(&handle, &surface).await;

            surface.trust_site(DAPP).await.unwrap();
            let sites = surface.connected_sites().await.unwrap();
            assert_eq!(sites.len(), 1);
            assert!(sites[0].trusted);

            surface.untrust_site(DAPP).await.unwrap();
            assert!(!surface.connected_sites().await.unwrap()[0].trusted);

            surface.switch_chain("0x89").await.unwrap();
            assert_eq!(surface.state().await.unwrap().selected_chain_id, "0x89");

            surface.disconnect_site(DAPP).await.unwrap();
            assert!(surface.connected_sites().await.unwrap().is_empty());
        })
        .await;
}

#[tokio::test]
async fn balance_and_gas_use_the_selected_chain() {
    LocalSet::new()
        .run_until(async {
            let (_handle, surface) = start(FakeSigner::default()).await;
            assert!(matches!(surface.balance(None).await, Err(CoreError::NotFound(_))));

            surface.import_wallet(KEY, "pw").await.unwrap();
            surface.switch_chain("0x5").await.unwrap();
            assert_eq!(surface.balance(None).await.unwrap(), format!("{}@0x5", ADDRESS));
            assert_eq!(surface.balance(Some("0xdef")).await.unwrap(), "0xdef@0x5");
            assert_eq!(surface.estimate_gas().await.unwrap(), "21000@0x5");
        })
        .await;
}

#[tokio::test]
async fn walletconnect_sessions_are_managed_from_the_popup() {
    LocalSet::new()
        .run_until(async {
            let (handle, surface) = start(FakeSigner::default()).await;
            surface.import_wallet(KEY, "pw").await.unwrap();

            let proposal = handle
                .dispatch(
                    Envelope::new(MessageKind::WcSessionRequest)
                        .with("peerName", "Dex")
                        .with("peerUrl", "https://dex.test/app"),
                    SenderInfo::default(),
                )
                .await
                .unwrap();
            let Reply::Later(deferred) = proposal else {
                panic!("session proposal should wait for the user");
            };

            surface.approve_wc_session(&deferred.request_id).await.unwrap();
            assert!(deferred.wait().await.unwrap().success);

            let sessions = surface.wc_sessions().await.unwrap();
            assert_eq!(sessions.len(), 1);
            assert_eq!(sessions[0].accounts, vec![ADDRESS.to_string()]);
            surface.disconnect_wc_session(&sessions[0].session_id).await.unwrap();
            assert!(surface.wc_sessions().await.unwrap().is_empty());
        })
        .await;
}
