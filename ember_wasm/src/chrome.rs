// Bindings to the extension runtime APIs the contexts use

use async_trait::async_trait;
use ember_core::{BrokerChannel, BrokerResponse, CoreError, Envelope};
use js_sys::{Function, Object, Promise};
use log::trace;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;

use crate::js::{from_js, to_js, transport_error};

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(catch, js_namespace = ["chrome", "runtime"], js_name = sendMessage)]
    fn runtime_send_message(message: &JsValue) -> Result<Promise, JsValue>;

    #[wasm_bindgen(js_namespace = ["chrome", "runtime", "onMessage"], js_name = addListener)]
    pub fn add_runtime_listener(listener: &Function);

    #[wasm_bindgen(catch, js_namespace = ["chrome", "tabs"], js_name = query)]
    fn tabs_query(query: &Object) -> Result<Promise, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "tabs"], js_name = sendMessage)]
    fn tabs_send_message(tab_id: f64, message: &JsValue) -> Result<Promise, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "action"], js_name = setBadgeText)]
    fn action_set_badge_text(details: &Object) -> Result<Promise, JsValue>;
}

async fn settle(promise: Result<Promise, JsValue>) -> Result<JsValue, JsValue> {
    JsFuture::from(promise?).await
}

/// `chrome.runtime.sendMessage`; resolves to whatever the listener answered.
pub async fn send_to_runtime(message: &JsValue) -> Result<JsValue, JsValue> {
    settle(runtime_send_message(message)).await
}

pub async fn query_tab_ids() -> Result<Vec<f64>, JsValue> {
    let tabs = settle(tabs_query(&Object::new())).await?;
    Ok(js_sys::Array::from(&tabs)
        .iter()
        .filter_map(|tab| js_sys::Reflect::get(&tab, &"id".into()).ok())
        .filter_map(|id| id.as_f64())
        .collect())
}

pub async fn send_to_tab(tab_id: f64, message: &JsValue) -> Result<JsValue, JsValue> {
    settle(tabs_send_message(tab_id, message)).await
}

pub async fn set_badge_text(text: &str) -> Result<(), JsValue> {
    let details = Object::new();
    js_sys::Reflect::set(&details, &"text".into(), &JsValue::from_str(text))?;
    settle(action_set_badge_text(&details)).await.map(|_| ())
}

/// Reaches the background broker over runtime messaging. The background
/// derives the sender identity itself, so content scripts and the popup use
/// the same channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeChannel;

#[async_trait(?Send)]
impl BrokerChannel for RuntimeChannel {
    async fn send(&self, envelope: Envelope) -> Result<Option<BrokerResponse>, CoreError> {
        let message = to_js(&envelope.to_value()).map_err(|e| transport_error("encode", e))?;
        let reply = send_to_runtime(&message)
            .await
            .map_err(|e| transport_error("runtime.sendMessage", e))?;
        if reply.is_undefined() || reply.is_null() {
            trace!("Broker accepted {} without an answer", envelope.kind);
            return Ok(None);
        }
        from_js(reply)
            .map(Some)
            .map_err(|e| transport_error("decode", e))
    }
}
