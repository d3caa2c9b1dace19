// Content-script context: relays between the page window and the broker

use std::rc::Rc;

use js_sys::Function;
use log::info;
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::spawn_local;
use web_sys::{Document, HtmlLinkElement, MessageEvent, Window};

use ember_core::{Envelope, PageContext, PagePort, Relay};

use crate::chrome::{self, RuntimeChannel};
use crate::js::{from_js, js_error, to_js};

/// Posts to the page window, restricted to the page's own origin.
pub struct WindowPort {
    window: Window,
    origin: String,
}

impl WindowPort {
    pub fn new(window: Window, origin: String) -> Self {
        Self { window, origin }
    }

    pub fn post_value(&self, value: &Value) {
        if let Ok(message) = to_js(value) {
            let _ = self.window.post_message(&message, &self.origin);
        }
    }
}

impl PagePort for WindowPort {
    fn post(&self, envelope: &Envelope) {
        self.post_value(&envelope.to_value());
    }
}

/// Payload of a window `message` event, if it came from this same window.
pub fn same_window_data(window: &Window, event: &MessageEvent) -> Option<Value> {
    let source = event.source()?;
    if JsValue::from(source) != JsValue::from(window.clone()) {
        return None;
    }
    from_js(event.data()).ok()
}

/// `<link rel="icon">` (which also matches `shortcut icon`), else empty.
fn favicon(document: &Document) -> String {
    document
        .query_selector("link[rel~='icon']")
        .ok()
        .flatten()
        .and_then(|element| element.dyn_into::<HtmlLinkElement>().ok())
        .map(|link| link.href())
        .unwrap_or_default()
}

type PageRelay = Relay<RuntimeChannel, WindowPort>;

#[wasm_bindgen]
pub struct ContentRelay {
    relay: Rc<PageRelay>,
}

#[wasm_bindgen]
impl ContentRelay {
    /// Attach to the current page: forward its requests to the broker and
    /// its broadcasts back to the page.
    pub fn attach() -> Result<ContentRelay, JsValue> {
        let window = web_sys::window().ok_or_else(|| js_error("No window object available"))?;
        let document = window.document().ok_or_else(|| js_error("No document available"))?;
        let origin = window.location().origin()?;
        let context = PageContext { origin: origin.clone(), favicon: favicon(&document), title: document.title() };

        let relay = Rc::new(Relay::new(RuntimeChannel, WindowPort::new(window.clone(), origin.clone()), context));

        let page_relay = relay.clone();
        let page_window = window.clone();
        let on_page = Closure::wrap(Box::new(move |event: MessageEvent| {
            let Some(message) = same_window_data(&page_window, &event) else {
                return;
            };
            let relay = page_relay.clone();
            spawn_local(async move { relay.on_page_message(&message).await });
        }) as Box<dyn FnMut(MessageEvent)>);
        window.add_event_listener_with_callback("message", on_page.as_ref().unchecked_ref())?;
        on_page.forget();

        let tab_relay = relay.clone();
        let on_broadcast = Closure::wrap(Box::new(move |message: JsValue, _sender: JsValue, _respond: Function| {
            if let Ok(message) = from_js::<Value>(message) {
                tab_relay.on_broadcast(&message);
            }
            JsValue::FALSE
        }) as Box<dyn FnMut(JsValue, JsValue, Function) -> JsValue>);
        chrome::add_runtime_listener(on_broadcast.as_ref().unchecked_ref());
        on_broadcast.forget();

        info!("Relay attached to {}", origin);
        Ok(ContentRelay { relay })
    }

    /// Tab-local connection hint; the broker stays authoritative.
    #[wasm_bindgen(getter, js_name = siteConnected)]
    pub fn site_connected(&self) -> bool {
        self.relay.cache().site_connected
    }

    #[wasm_bindgen(getter)]
    pub fn origin(&self) -> String {
        self.relay.context().origin.clone()
    }
}
