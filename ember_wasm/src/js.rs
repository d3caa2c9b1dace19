// Conversions between core values and JS values

use std::fmt;
use std::future::Future;

use ember_core::{CoreError, RpcError};
use js_sys::{Promise, Reflect};
use serde::{de::DeserializeOwned, Serialize};
use wasm_bindgen::JsValue;
use wasm_bindgen_futures::future_to_promise;

/// Plain JS objects (not `Map`s) so page scripts can read them directly.
pub fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(js_error)
}

pub fn from_js<T: DeserializeOwned>(value: JsValue) -> Result<T, JsValue> {
    serde_wasm_bindgen::from_value(value).map_err(js_error)
}

pub fn js_error(err: impl fmt::Display) -> JsValue {
    js_sys::Error::new(&err.to_string()).into()
}

/// An `Error` carrying the numeric `code` (and `data`) callers switch on.
pub fn rpc_error_to_js(err: &RpcError) -> JsValue {
    let error = js_sys::Error::new(&err.message);
    let _ = Reflect::set(&error, &"code".into(), &JsValue::from_f64(err.code.code() as f64));
    if let Some(data) = err.data.as_ref().and_then(|d| to_js(d).ok()) {
        let _ = Reflect::set(&error, &"data".into(), &data);
    }
    error.into()
}

pub fn core_error_to_js(err: &CoreError) -> JsValue {
    rpc_error_to_js(&err.to_rpc_error())
}

pub fn transport_error(context: &str, err: JsValue) -> CoreError {
    CoreError::Transport(format!("{}: {:?}", context, err))
}

/// Run a core future and hand JS a promise of its serialized result.
pub fn promise<T, F>(future: F) -> Promise
where
    T: Serialize,
    F: Future<Output = Result<T, CoreError>> + 'static,
{
    future_to_promise(async move {
        match future.await {
            Ok(value) => to_js(&value),
            Err(e) => Err(core_error_to_js(&e)),
        }
    })
}
