use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;
use serde_json::{json, Value};

use super::*;
use crate::protocol::{BroadcastEvent, ErrorCode};

#[derive(Default, Clone)]
struct Outbox(Rc<RefCell<Vec<Envelope>>>);

impl PageTransport for Outbox {
    fn post(&self, envelope: &Envelope) {
        self.0.borrow_mut().push(envelope.clone());
    }
}

impl Outbox {
    fn take(&self) -> Vec<Envelope> {
        self.0.borrow_mut().drain(..).collect()
    }
}

struct TestSleeper;

impl Sleeper for TestSleeper {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed_local()
    }
}

type TestProvider = Provider<Outbox, TestSleeper, RustListener>;

fn provider() -> (TestProvider, Outbox) {
    let outbox = Outbox::default();
    (Provider::new(outbox.clone(), TestSleeper, Duration::from_secs(30)), outbox)
}

/// Let the provider post, then answer everything it posted.
async fn answer_all(provider: &TestProvider, outbox: &Outbox, answer: impl Fn(&Envelope) -> Result<Value, RpcError>) {
    tokio::task::yield_now().await;
    for envelope in outbox.take() {
        let id = envelope.id.clone().unwrap();
        provider.handle_message(&Envelope::response(&id, &answer(&envelope)).to_value());
    }
}

fn recorder(log: &Rc<RefCell<Vec<Value>>>) -> RustListener {
    let log = log.clone();
    Rc::new(move |payload: &Value| log.borrow_mut().push(payload.clone()))
}

#[tokio::test]
async fn missing_method_is_invalid_params() {
    let (provider, outbox) = provider();
    let error = provider.request(RequestArguments::default()).await.unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidParams);
    assert!(outbox.take().is_empty());
}

#[tokio::test]
async fn eth_accounts_never_round_trips() {
    let (provider, outbox) = provider();
    let accounts = provider.request(RequestArguments::new("eth_accounts", vec![])).await.unwrap();
    assert_eq!(accounts, json!([]));
    assert!(outbox.take().is_empty());
}

#[tokio::test]
async fn request_accounts_connects_once_then_uses_cache() {
    let (provider, outbox) = provider();

    let call = provider.request(RequestArguments::new("eth_requestAccounts", vec![]));
    let answer = answer_all(&provider, &outbox, |envelope| {
        assert_eq!(envelope.kind, MessageKind::Connect);
        assert!(envelope.id.as_deref().unwrap().starts_with("connect_"));
        Ok(json!(["0xabc"]))
    });
    let (accounts, ()) = tokio::join!(call, answer);

    assert_eq!(accounts.unwrap(), json!(["0xabc"]));
    assert!(provider.is_connected());
    assert_eq!(provider.selected_address().as_deref(), Some("0xabc"));
    assert_eq!(provider.in_flight_count(), 0);

    let again = provider.request(RequestArguments::new("eth_requestAccounts", vec![])).await.unwrap();
    assert_eq!(again, json!(["0xabc"]));
    assert!(outbox.take().is_empty());

    let visible = provider.request(RequestArguments::new("eth_accounts", vec![])).await.unwrap();
    assert_eq!(visible, json!(["0xabc"]));
}

#[tokio::test]
async fn other_methods_are_forwarded_verbatim() {
    let (provider, outbox) = provider();
    let call = provider.request(RequestArguments::new("eth_getBalance", vec![json!("0xabc"), json!("latest")]));
    let answer = answer_all(&provider, &outbox, |envelope| {
        assert_eq!(envelope.kind, MessageKind::Request);
        assert_eq!(envelope.method.as_deref(), Some("eth_getBalance"));
        assert_eq!(envelope.params.as_ref().unwrap().len(), 2);
        Err(RpcError::unauthorized())
    });
    let (result, ()) = tokio::join!(call, answer);
    assert_eq!(result.unwrap_err().code.code(), 4100);
}

#[tokio::test(start_paused = true)]
async fn unanswered_call_times_out_and_is_forgotten() {
    let (provider, outbox) = provider();

    let started = tokio::time::Instant::now();
    let error = provider.request(RequestArguments::new("eth_chainId", vec![])).await.unwrap_err();
    assert_eq!(started.elapsed(), Duration::from_secs(30));
    assert_eq!(error, RpcError::timed_out());
    assert_eq!(provider.in_flight_count(), 0);

    // Late answer finds nobody and is dropped quietly
    let late = outbox.take().pop().unwrap();
    provider.handle_message(&Envelope::response(late.id.as_deref().unwrap(), &Ok(json!("0x1"))).to_value());
    assert_eq!(provider.in_flight_count(), 0);
}

#[tokio::test]
async fn send_async_batch_zips_results_with_ids() {
    let (provider, outbox) = provider();
    let batch = json!([
        {"id": 1, "jsonrpc": "2.0", "method": "eth_chainId"},
        {"id": "two", "jsonrpc": "2.0", "method": "net_version", "params": []}
    ]);

    let call = provider.send_async(batch);
    let answer = answer_all(&provider, &outbox, |envelope| match envelope.method.as_deref() {
        Some("eth_chainId") => Ok(json!("0x1")),
        _ => Ok(json!("1")),
    });
    let (result, ()) = tokio::join!(call, answer);

    assert_eq!(
        result.unwrap(),
        json!([
            {"id": 1, "jsonrpc": "2.0", "result": "0x1"},
            {"id": "two", "jsonrpc": "2.0", "result": "1"}
        ])
    );
}

#[tokio::test]
async fn send_async_batch_fails_on_first_error() {
    let (provider, outbox) = provider();
    let batch = json!([
        {"id": 1, "method": "eth_chainId"},
        {"id": 2, "method": "eth_foo"}
    ]);

    let call = provider.send_async(batch);
    let answer = answer_all(&provider, &outbox, |envelope| match envelope.method.as_deref() {
        Some("eth_chainId") => Ok(json!("0x1")),
        Some(other) => Err(RpcError::method_not_found(other)),
        None => Err(RpcError::invalid_params("Missing method")),
    });
    let (result, ()) = tokio::join!(call, answer);
    assert_eq!(result.unwrap_err().code.code(), -32601);
}

#[tokio::test]
async fn legacy_send_accepts_method_string() {
    let (provider, outbox) = provider();
    let call = provider.send(json!("eth_chainId"), None);
    let answer = answer_all(&provider, &outbox, |_| Ok(json!("0x89")));
    let (result, ()) = tokio::join!(call, answer);
    assert_eq!(result.unwrap(), json!("0x89"));
}

#[test]
fn broadcasts_update_view_and_emit_events() {
    let (provider, _outbox) = provider();
    let accounts_log = Rc::new(RefCell::new(Vec::new()));
    let chain_log = Rc::new(RefCell::new(Vec::new()));
    let disconnect_log = Rc::new(RefCell::new(Vec::new()));
    let on_accounts = recorder(&accounts_log);
    provider.on(ACCOUNTS_CHANGED, on_accounts.clone());
    provider.on(CHAIN_CHANGED, recorder(&chain_log));
    provider.on(DISCONNECT, recorder(&disconnect_log));

    let accounts = BroadcastEvent::AccountsChanged { accounts: vec!["0xabc".into(), "0xdef".into()] };
    provider.handle_message(&accounts.to_envelope().to_value());
    assert!(provider.is_connected());
    assert_eq!(provider.selected_address().as_deref(), Some("0xabc"));
    assert_eq!(accounts_log.borrow().as_slice(), &[json!(["0xabc", "0xdef"])]);

    let chain = BroadcastEvent::ChainChanged { chain_id: "0x89".into() };
    provider.handle_message(&chain.to_envelope().to_value());
    assert_eq!(provider.chain_id().as_deref(), Some("0x89"));
    assert_eq!(chain_log.borrow().as_slice(), &[json!("0x89")]);

    provider.handle_message(&BroadcastEvent::Disconnected { origin: None }.to_envelope().to_value());
    assert!(!provider.is_connected());
    assert_eq!(provider.selected_address(), None);
    assert_eq!(disconnect_log.borrow()[0]["code"], 4900);

    provider.remove_listener(ACCOUNTS_CHANGED, &on_accounts);
    provider.handle_message(&accounts.to_envelope().to_value());
    assert_eq!(accounts_log.borrow().len(), 1);
}

#[test]
fn listener_may_unsubscribe_while_running() {
    let (provider, _outbox) = provider();
    let provider = Rc::new(provider);
    let calls = Rc::new(RefCell::new(0));
    let slot: Rc<RefCell<Option<RustListener>>> = Rc::new(RefCell::new(None));

    let listener: RustListener = {
        let provider = Rc::downgrade(&provider);
        let calls = calls.clone();
        let slot = slot.clone();
        Rc::new(move |_: &Value| {
            *calls.borrow_mut() += 1;
            if let (Some(provider), Some(me)) = (provider.upgrade(), slot.borrow().clone()) {
                provider.remove_listener(CHAIN_CHANGED, &me);
            }
        })
    };
    *slot.borrow_mut() = Some(listener.clone());
    provider.on(CHAIN_CHANGED, listener);

    let chain = BroadcastEvent::ChainChanged { chain_id: "0x5".into() }.to_envelope().to_value();
    provider.handle_message(&chain);
    provider.handle_message(&chain);
    assert_eq!(*calls.borrow(), 1);
}

#[test]
fn foreign_messages_are_ignored() {
    let (provider, _outbox) = provider();
    provider.handle_message(&json!({"type": "SOMEONE_ELSES", "accounts": ["0x1"]}));
    provider.handle_message(&json!({"type": "EMBER_CONNECT", "id": "connect_1_x"}));
    provider.handle_message(&json!(42));
    assert_eq!(provider.view(), AccountsView::default());
}

#[test]
fn request_ids_follow_type_timestamp_random() {
    let a = request_id(MessageKind::Request, 1_700_000_000_000);
    let b = request_id(MessageKind::Request, 1_700_000_000_000);
    assert_ne!(a, b);

    let parts: Vec<&str> = a.split('_').collect();
    assert_eq!(parts[0], "request");
    assert_eq!(parts[1], "1700000000000");
    assert_eq!(parts[2].len(), 9);
    assert!(request_id(MessageKind::GetState, 1).starts_with("get_state_1_"));
}
