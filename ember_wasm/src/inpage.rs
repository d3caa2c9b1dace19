// Page context: the EIP-1193 provider object handed to page scripts

use std::rc::Rc;

use js_sys::{Function, Promise, Reflect};
use log::{debug, info};
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::future_to_promise;
use web_sys::MessageEvent;

use ember_core::shim::{Listener, PageTransport};
use ember_core::wasm::BrowserSleeper;
use ember_core::{Envelope, Provider, ProviderInfo, ProviderRegistry, RequestArguments, RpcError, Settings};

use crate::content::{same_window_data, WindowPort};
use crate::js::{from_js, js_error, rpc_error_to_js, to_js};

const EMBER_RDNS: &str = "io.ember.wallet";

struct PageWire(WindowPort);

impl PageTransport for PageWire {
    fn post(&self, envelope: &Envelope) {
        self.0.post_value(&envelope.to_value());
    }
}

/// A page-supplied callback, compared by JS identity.
#[derive(Clone)]
struct JsListener(Function);

impl Listener for JsListener {
    fn call(&self, payload: &Value) {
        if let Ok(payload) = to_js(payload) {
            if let Err(e) = self.0.call1(&JsValue::NULL, &payload) {
                debug!("Listener threw: {:?}", e);
            }
        }
    }

    fn same(&self, other: &Self) -> bool {
        let a: &JsValue = self.0.as_ref();
        let b: &JsValue = other.0.as_ref();
        a == b
    }
}

type PageProvider = Provider<PageWire, BrowserSleeper, JsListener>;

fn settle_rpc(outcome: Result<Value, RpcError>) -> Result<JsValue, JsValue> {
    match outcome {
        Ok(value) => to_js(&value),
        Err(e) => Err(rpc_error_to_js(&e)),
    }
}

/// `(error, result)` for a legacy callback; the unused slot is `null`.
fn node_style_args(outcome: &Result<JsValue, JsValue>) -> (JsValue, JsValue) {
    match outcome {
        Ok(result) => (JsValue::NULL, result.clone()),
        Err(error) => (error.clone(), JsValue::NULL),
    }
}

#[wasm_bindgen]
#[derive(Clone)]
pub struct InjectedProvider {
    provider: Rc<PageProvider>,
}

#[wasm_bindgen]
impl InjectedProvider {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Result<InjectedProvider, JsValue> {
        let window = web_sys::window().ok_or_else(|| js_error("No window object available"))?;
        let origin = window.location().origin()?;
        let timeout = Settings::default().provider_timeout();
        let provider = Rc::new(Provider::new(
            PageWire(WindowPort::new(window.clone(), origin)),
            BrowserSleeper,
            timeout,
        ));

        let inbound = provider.clone();
        let listen_window = window.clone();
        let on_message = Closure::wrap(Box::new(move |event: MessageEvent| {
            if let Some(message) = same_window_data(&listen_window, &event) {
                inbound.handle_message(&message);
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        window.add_event_listener_with_callback("message", on_message.as_ref().unchecked_ref())?;
        on_message.forget();

        Ok(InjectedProvider { provider })
    }

    /// Create the provider and expose the highest-priority provider as
    /// `window.ethereum`. A provider the page already had is kept in the
    /// registry below ours.
    pub fn install() -> Result<InjectedProvider, JsValue> {
        let window = web_sys::window().ok_or_else(|| js_error("No window object available"))?;
        let injected = InjectedProvider::new()?;

        let mut registry = ProviderRegistry::new();
        let existing = Reflect::get(&window, &"ethereum".into())?;
        if !existing.is_undefined() && !existing.is_null() {
            let info = ProviderInfo { name: "Existing provider".into(), rdns: "page.existing".into(), icon: None };
            registry.register(info, 0, existing);
        }
        let ours = ProviderInfo { name: "Ember".into(), rdns: EMBER_RDNS.into(), icon: None };
        registry.register(ours, 10, JsValue::from(injected.clone()));

        if let Some(primary) = registry.primary() {
            Reflect::set(&window, &"ethereum".into(), primary)?;
        }
        if let Some(ember) = registry.get(EMBER_RDNS) {
            Reflect::set(&window, &"ember".into(), ember)?;
        }
        info!("Provider installed ({} registered)", registry.len());
        Ok(injected)
    }

    /// `request({method, params})`.
    pub fn request(&self, args: JsValue) -> Promise {
        let provider = self.provider.clone();
        future_to_promise(async move {
            let args: RequestArguments =
                from_js(args).map_err(|_| rpc_error_to_js(&RpcError::invalid_params("Missing method")))?;
            settle_rpc(provider.request(args).await)
        })
    }

    /// Legacy `enable()`, same as `eth_requestAccounts`.
    pub fn enable(&self) -> Promise {
        let provider = self.provider.clone();
        future_to_promise(async move {
            settle_rpc(provider.request(RequestArguments::new("eth_requestAccounts", Vec::new())).await)
        })
    }

    /// Legacy `send(method, params)` or `send(payload)`.
    pub fn send(&self, method_or_payload: JsValue, params: JsValue) -> Promise {
        let provider = self.provider.clone();
        future_to_promise(async move {
            let first: Value = from_js(method_or_payload)?;
            let params: Option<Value> =
                if params.is_undefined() { None } else { Some(from_js(params)?) };
            settle_rpc(provider.send(first, params).await)
        })
    }

    /// Legacy `sendAsync(payload, callback)`; the callback gets `(error, result)`.
    #[wasm_bindgen(js_name = sendAsync)]
    pub fn send_async(&self, payload: JsValue, callback: Option<Function>) -> Promise {
        let provider = self.provider.clone();
        future_to_promise(async move {
            let payload: Value = from_js(payload)?;
            let outcome = settle_rpc(provider.send_async(payload).await);
            if let Some(callback) = callback {
                let (error, result) = node_style_args(&outcome);
                let _ = callback.call2(&JsValue::NULL, &error, &result);
            }
            outcome
        })
    }

    pub fn on(&self, event: &str, listener: Function) {
        self.provider.on(event, JsListener(listener));
    }

    #[wasm_bindgen(js_name = removeListener)]
    pub fn remove_listener(&self, event: &str, listener: Function) {
        self.provider.remove_listener(event, &JsListener(listener));
    }

    #[wasm_bindgen(js_name = removeAllListeners)]
    pub fn remove_all_listeners(&self, event: Option<String>) {
        self.provider.remove_all_listeners(event.as_deref());
    }

    #[wasm_bindgen(js_name = isConnected)]
    pub fn is_connected(&self) -> bool {
        self.provider.is_connected()
    }

    #[wasm_bindgen(getter, js_name = selectedAddress)]
    pub fn selected_address(&self) -> Option<String> {
        self.provider.selected_address()
    }

    #[wasm_bindgen(getter, js_name = chainId)]
    pub fn chain_id(&self) -> Option<String> {
        self.provider.chain_id()
    }

    #[wasm_bindgen(getter, js_name = isEmber)]
    pub fn is_ember(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_bindgen_test::wasm_bindgen_test;

    #[wasm_bindgen_test]
    fn failed_send_async_passes_null_result() {
        let error = rpc_error_to_js(&RpcError::user_rejected());
        let (first, second) = node_style_args(&Err(error.clone()));
        assert_eq!(first, error);
        assert!(second.is_null());
    }

    #[wasm_bindgen_test]
    fn successful_send_async_passes_null_error() {
        let (first, second) = node_style_args(&Ok(JsValue::from_str("0x1")));
        assert!(first.is_null());
        assert_eq!(second.as_string().as_deref(), Some("0x1"));
    }
}
