// Service-worker context: owns the broker and fans broadcasts out to tabs

use futures_util::future::join_all;
use js_sys::{Function, Promise};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{future_to_promise, spawn_local};

use ember_core::wasm::{BrowserScheduler, ExtensionStorage};
use ember_core::{
    expiry_channel, origin_of, run, BroadcastEvent, Broker, BrokerHandle, Envelope, ExtensionHost, PendingRequest,
    SenderInfo, Settings, SystemClock,
};

use crate::chrome;
use crate::js::{from_js, js_error, to_js};

/// `tab` of a `chrome.runtime.MessageSender`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChromeTab {
    id: Option<i64>,
    url: Option<String>,
    fav_icon_url: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChromeSender {
    tab: Option<ChromeTab>,
    origin: Option<String>,
    url: Option<String>,
}

impl From<ChromeSender> for SenderInfo {
    // Only senders inside a tab are web pages; the popup and other
    // extension pages have no tab and are privileged.
    fn from(sender: ChromeSender) -> Self {
        let Some(tab) = sender.tab else {
            return SenderInfo::default();
        };
        let url = sender.url.or(tab.url);
        let origin = sender.origin.or_else(|| url.as_deref().and_then(origin_of));
        SenderInfo { origin, tab_id: tab.id, url, favicon: tab.fav_icon_url, title: tab.title }
    }
}

struct ChromeHost;

impl ExtensionHost for ChromeHost {
    fn broadcast(&self, event: &BroadcastEvent) {
        let message = match to_js(&event.to_envelope().to_value()) {
            Ok(message) => message,
            Err(e) => {
                warn!("Could not encode {}: {:?}", event.kind(), e);
                return;
            }
        };
        spawn_local(async move {
            // Extension pages; rejects when no popup is open
            let _ = chrome::send_to_runtime(&message).await;
            match chrome::query_tab_ids().await {
                Ok(ids) => {
                    // Tabs without a content script reject; that is expected
                    join_all(ids.into_iter().map(|id| chrome::send_to_tab(id, &message))).await;
                }
                Err(e) => warn!("tabs.query failed: {:?}", e),
            }
        });
    }

    fn notify_pending(&self, request: &PendingRequest, queue_len: usize) {
        info!("{:?} request {} from {} awaits approval", request.kind, request.id, request.origin);
        self.queue_changed(queue_len);
    }

    fn queue_changed(&self, queue_len: usize) {
        let text = if queue_len == 0 { String::new() } else { queue_len.to_string() };
        spawn_local(async move {
            if let Err(e) = chrome::set_badge_text(&text).await {
                debug!("setBadgeText failed: {:?}", e);
            }
        });
    }
}

async fn dispatch(handle: BrokerHandle, message: JsValue, sender: JsValue) -> Result<JsValue, JsValue> {
    let raw: Value = from_js(message)?;
    let Some(envelope) = Envelope::from_value(&raw) else {
        return Ok(JsValue::UNDEFINED);
    };
    let sender: SenderInfo = from_js::<ChromeSender>(sender).unwrap_or_default().into();
    match handle.request(envelope, sender).await.map_err(js_error)? {
        Some(response) => to_js(&response),
        None => Ok(JsValue::UNDEFINED),
    }
}

#[wasm_bindgen]
pub struct BackgroundBroker {
    handle: BrokerHandle,
}

#[wasm_bindgen]
impl BackgroundBroker {
    /// Restore persisted state, start the broker task and answer runtime
    /// messages. `config` takes the same keys as the settings file.
    pub async fn start(config: JsValue) -> Result<BackgroundBroker, JsValue> {
        let settings: Settings = if config.is_undefined() || config.is_null() {
            Settings::default()
        } else {
            from_js(config)?
        };
        settings.validate().map_err(js_error)?;

        let (handle, commands) = BrokerHandle::channel();
        let (expired_tx, expired_rx) = expiry_channel();
        let broker = Broker::load(
            ExtensionStorage::new(settings.storage_prefix.clone()),
            &settings,
            Box::new(ChromeHost),
            Box::new(BrowserScheduler::new(expired_tx)),
            Box::new(SystemClock),
        )
        .await;
        spawn_local(run(broker, commands, expired_rx));

        let background = BackgroundBroker { handle };
        background.listen();
        info!("Background broker ready");
        Ok(background)
    }

    /// Handle one runtime message; resolves to the response or `undefined`.
    #[wasm_bindgen(js_name = handleMessage)]
    pub fn handle_message(&self, message: JsValue, sender: JsValue) -> Promise {
        future_to_promise(dispatch(self.handle.clone(), message, sender))
    }

    fn listen(&self) {
        let handle = self.handle.clone();
        let listener = Closure::wrap(Box::new(move |message: JsValue, sender: JsValue, respond: Function| {
            let handle = handle.clone();
            spawn_local(async move {
                let reply = dispatch(handle, message, sender).await.unwrap_or_else(|e| e);
                let _ = respond.call1(&JsValue::NULL, &reply);
            });
            // Keep the channel open for the async answer
            JsValue::TRUE
        }) as Box<dyn FnMut(JsValue, JsValue, Function) -> JsValue>);
        chrome::add_runtime_listener(listener.as_ref().unchecked_ref());
        listener.forget();
    }
}
