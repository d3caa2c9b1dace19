// Popup context: approval UI controller backed by JS key-handling objects

use std::rc::Rc;

use async_trait::async_trait;
use js_sys::{Array, Function, Promise, Reflect};
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

use ember_core::{ApprovalSurface, BroadcastEvent, CoreError, Envelope, SecretStore, Signer, WalletKeys};

use crate::chrome::{self, RuntimeChannel};
use crate::js::{from_js, promise, transport_error};

/// Call `target[name](...args)` and await the result if it is a promise.
async fn invoke(target: &JsValue, name: &str, args: &[JsValue]) -> Result<JsValue, CoreError> {
    let method = Reflect::get(target, &name.into())
        .ok()
        .and_then(|m| m.dyn_into::<Function>().ok())
        .ok_or_else(|| CoreError::InvalidInput(format!("collaborator has no {}()", name)))?;
    let args: Array = args.iter().collect();
    let returned = method
        .apply(target, &args)
        .map_err(|e| CoreError::Signer(format!("{} threw: {:?}", name, e)))?;
    JsFuture::from(Promise::resolve(&returned))
        .await
        .map_err(|e| CoreError::Signer(format!("{} failed: {:?}", name, e)))
}

async fn invoke_string(target: &JsValue, name: &str, args: &[JsValue]) -> Result<String, CoreError> {
    invoke(target, name, args)
        .await?
        .as_string()
        .ok_or_else(|| CoreError::Signer(format!("{} did not return a string", name)))
}

/// Signer implemented by a JS object (`createWallet`, `connectWithKey`,
/// `sendToken`, `getBalance`, `estimateGas`).
pub struct JsSigner(JsValue);

#[async_trait(?Send)]
impl Signer for JsSigner {
    async fn create_wallet(&self) -> Result<WalletKeys, CoreError> {
        let keys = invoke(&self.0, "createWallet", &[]).await?;
        from_js(keys).map_err(|e| transport_error("createWallet result", e))
    }

    async fn connect_with_key(&self, private_key: &str) -> Result<String, CoreError> {
        invoke_string(&self.0, "connectWithKey", &[private_key.into()]).await
    }

    async fn send_token(&self, private_key: &str, to: &str, amount: &str, chain_id: &str) -> Result<String, CoreError> {
        let args: [JsValue; 4] = [private_key.into(), to.into(), amount.into(), chain_id.into()];
        invoke_string(&self.0, "sendToken", &args).await
    }

    async fn get_balance(&self, address: &str, chain_id: &str) -> Result<String, CoreError> {
        invoke_string(&self.0, "getBalance", &[address.into(), chain_id.into()]).await
    }

    async fn estimate_gas(&self, chain_id: &str) -> Result<String, CoreError> {
        invoke_string(&self.0, "estimateGas", &[chain_id.into()]).await
    }
}

/// Password vault implemented by a JS object (`save`, `load`, `exists`).
pub struct JsSecretStore(JsValue);

#[async_trait(?Send)]
impl SecretStore for JsSecretStore {
    async fn save(&self, blob: &str, password: &str) -> Result<(), CoreError> {
        invoke(&self.0, "save", &[blob.into(), password.into()]).await.map(|_| ())
    }

    async fn load(&self, password: &str) -> Result<Option<String>, CoreError> {
        Ok(invoke(&self.0, "load", &[password.into()]).await?.as_string())
    }

    async fn exists(&self) -> Result<bool, CoreError> {
        Ok(invoke(&self.0, "exists", &[]).await?.is_truthy())
    }
}

type Surface = ApprovalSurface<RuntimeChannel, JsSigner, JsSecretStore>;

#[wasm_bindgen]
pub struct PopupController {
    surface: Rc<Surface>,
}

#[wasm_bindgen]
impl PopupController {
    #[wasm_bindgen(constructor)]
    pub fn new(signer: JsValue, secrets: JsValue) -> PopupController {
        let surface = ApprovalSurface::new(RuntimeChannel, JsSigner(signer), JsSecretStore(secrets));
        PopupController { surface: Rc::new(surface) }
    }

    /// Call `callback(envelope)` for every broker broadcast while the popup is open.
    #[wasm_bindgen(js_name = onBroadcast)]
    pub fn on_broadcast(&self, callback: Function) {
        let listener = Closure::wrap(Box::new(move |message: JsValue, _sender: JsValue, _respond: Function| {
            let is_broadcast = from_js::<Value>(message.clone())
                .ok()
                .and_then(|raw| Envelope::from_value(&raw))
                .and_then(|envelope| BroadcastEvent::from_envelope(&envelope))
                .is_some();
            if is_broadcast {
                let _ = callback.call1(&JsValue::NULL, &message);
            }
            JsValue::FALSE
        }) as Box<dyn FnMut(JsValue, JsValue, Function) -> JsValue>);
        chrome::add_runtime_listener(listener.as_ref().unchecked_ref());
        listener.forget();
    }

    #[wasm_bindgen(js_name = hasWallet)]
    pub fn has_wallet(&self) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.has_wallet().await })
    }

    #[wasm_bindgen(js_name = createWallet)]
    pub fn create_wallet(&self, password: String) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.create_wallet(&password).await })
    }

    #[wasm_bindgen(js_name = importWallet)]
    pub fn import_wallet(&self, private_key: String, password: String) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.import_wallet(&private_key, &password).await })
    }

    pub fn unlock(&self, password: String) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.unlock(&password).await })
    }

    pub fn lock(&self) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.lock().await })
    }

    pub fn state(&self) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.state().await })
    }

    #[wasm_bindgen(js_name = pendingRequests)]
    pub fn pending_requests(&self) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.pending_requests().await })
    }

    #[wasm_bindgen(js_name = connectedSites)]
    pub fn connected_sites(&self) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.connected_sites().await })
    }

    #[wasm_bindgen(js_name = approveConnection)]
    pub fn approve_connection(&self, request_id: String, origin: String, remember_site: bool) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.approve_connection(&request_id, &origin, remember_site).await })
    }

    #[wasm_bindgen(js_name = rejectConnection)]
    pub fn reject_connection(&self, request_id: String, origin: String) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.reject_connection(&request_id, &origin).await })
    }

    #[wasm_bindgen(js_name = approveTransaction)]
    pub fn approve_transaction(&self, request_id: String, password: String) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.approve_transaction(&request_id, &password).await })
    }

    /// Answer a signing request with a result the popup produced itself.
    #[wasm_bindgen(js_name = approveWithResult)]
    pub fn approve_with_result(&self, request_id: String, result: JsValue) -> Promise {
        let surface = self.surface.clone();
        promise(async move {
            let result: Value = from_js(result).map_err(|e| transport_error("result", e))?;
            surface.approve_with_result(&request_id, result).await
        })
    }

    #[wasm_bindgen(js_name = rejectTransaction)]
    pub fn reject_transaction(&self, request_id: String) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.reject_transaction(&request_id).await })
    }

    #[wasm_bindgen(js_name = disconnectSite)]
    pub fn disconnect_site(&self, origin: String) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.disconnect_site(&origin).await })
    }

    #[wasm_bindgen(js_name = switchChain)]
    pub fn switch_chain(&self, chain_id: String) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.switch_chain(&chain_id).await })
    }

    #[wasm_bindgen(js_name = trustSite)]
    pub fn trust_site(&self, origin: String) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.trust_site(&origin).await })
    }

    #[wasm_bindgen(js_name = untrustSite)]
    pub fn untrust_site(&self, origin: String) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.untrust_site(&origin).await })
    }

    pub fn balance(&self, address: Option<String>) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.balance(address.as_deref()).await })
    }

    #[wasm_bindgen(js_name = estimateGas)]
    pub fn estimate_gas(&self) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.estimate_gas().await })
    }

    #[wasm_bindgen(js_name = approveWcSession)]
    pub fn approve_wc_session(&self, request_id: String) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.approve_wc_session(&request_id).await })
    }

    #[wasm_bindgen(js_name = rejectWcSession)]
    pub fn reject_wc_session(&self, request_id: String) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.reject_wc_session(&request_id).await })
    }

    #[wasm_bindgen(js_name = disconnectWcSession)]
    pub fn disconnect_wc_session(&self, session_id: String) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.disconnect_wc_session(&session_id).await })
    }

    #[wasm_bindgen(js_name = wcSessions)]
    pub fn wc_sessions(&self) -> Promise {
        let surface = self.surface.clone();
        promise(async move { surface.wc_sessions().await })
    }
}
