// Ember WASM Bindings
// Entry points for the extension's background, content, page and popup contexts

use wasm_bindgen::prelude::*;

#[cfg(target_arch = "wasm32")]
mod background;
#[cfg(target_arch = "wasm32")]
mod chrome;
#[cfg(target_arch = "wasm32")]
mod content;
#[cfg(target_arch = "wasm32")]
mod inpage;
#[cfg(target_arch = "wasm32")]
mod js;
#[cfg(target_arch = "wasm32")]
mod popup;

#[cfg(target_arch = "wasm32")]
pub use background::BackgroundBroker;
#[cfg(target_arch = "wasm32")]
pub use content::ContentRelay;
#[cfg(target_arch = "wasm32")]
pub use inpage::InjectedProvider;
#[cfg(target_arch = "wasm32")]
pub use popup::PopupController;

// Initialize panic hook and logger for WASM
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::default());
}
