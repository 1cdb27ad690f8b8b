//! Content script entry point.
//!
//! Runs the [`peerscope_inspector::bridge::PageBridge`] inside the inspected
//! page. The monitored library talks to it with `window.postMessage`; the
//! relay connects to it with `chrome.tabs.connect`.

fn main() {
    // Content scripts don't mount DOM; they only listen for messages.
    #[cfg(all(target_arch = "wasm32", target_os = "unknown"))]
    {
        console_error_panic_hook::set_once();
        if let Err(error) = start() {
            web_sys::console::error_2(&"peerscope: could not start page bridge".into(), &error);
        }
    }
}

#[cfg(all(target_arch = "wasm32", target_os = "unknown"))]
fn start() -> Result<(), wasm_bindgen::JsValue> {
    use std::sync::Arc;

    use peerscope_inspector::{
        bridge::PageBridge,
        config::InspectorConfig,
        runtime,
        web::{self, NavigatorClipboard, WindowBroadcast},
    };
    use wasm_bindgen::{JsCast, prelude::*};

    let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
    let broadcast = WindowBroadcast::new().map_err(|error| JsValue::from_str(&error.to_string()))?;

    let config = InspectorConfig::default();
    let (bridge, handle) = PageBridge::new(
        config.channels,
        Arc::new(NavigatorClipboard),
        Arc::new(broadcast),
    );
    runtime::spawn(bridge.run());

    // Only messages posted by this very window are considered.
    let page = handle.clone();
    let own_window = window.clone();
    let on_message = Closure::wrap(Box::new(move |event: web_sys::MessageEvent| {
        let same_window = event
            .source()
            .is_some_and(|source| JsValue::from(source) == JsValue::from(own_window.clone()));
        if !same_window {
            return;
        }
        if let Some(envelope) = web::envelope_from_js(&event.data()) {
            page.broadcast(envelope);
        }
    }) as Box<dyn FnMut(web_sys::MessageEvent)>);
    window.add_event_listener_with_callback("message", on_message.as_ref().unchecked_ref())?;
    on_message.forget();

    web::add_listener(
        "runtime.onConnect",
        Closure::wrap(Box::new(move |port: JsValue| {
            if let Ok(channel) = web::attach_port(port) {
                let _ = handle.connect(channel);
            }
        }) as Box<dyn FnMut(JsValue)>),
    )?;

    Ok(())
}
