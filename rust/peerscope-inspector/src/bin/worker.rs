//! Background (service worker) entry point.
//!
//! Runs the [`peerscope_inspector::hub::RelayHub`]. Inspector panels reach
//! it with `chrome.runtime.connect`; it reaches pages with
//! `chrome.tabs.connect` and learns about navigations from
//! `chrome.tabs.onUpdated`.

fn main() {
    // The relay only exists inside the extension; on other targets this is
    // a no-op.
    #[cfg(all(target_arch = "wasm32", target_os = "unknown"))]
    {
        console_error_panic_hook::set_once();
        if let Err(error) = start() {
            web_sys::console::error_2(&"peerscope: could not start relay".into(), &error);
        }
    }
}

#[cfg(all(target_arch = "wasm32", target_os = "unknown"))]
fn start() -> Result<(), wasm_bindgen::JsValue> {
    use std::sync::Arc;

    use js_sys::Reflect;
    use peerscope_inspector::{
        config::InspectorConfig,
        hub::RelayHub,
        runtime,
        web::{self, ScriptingExecutor, TabsConnector},
    };
    use peerscope_protocol::ContextId;
    use wasm_bindgen::prelude::*;

    let config = InspectorConfig::default();
    let (hub, handle) = RelayHub::new(
        config.channels,
        Arc::new(TabsConnector),
        Arc::new(ScriptingExecutor),
    );
    runtime::spawn(hub.run());

    // chrome.runtime.onConnect: the hub checks the port name itself.
    let connections = handle.clone();
    web::add_listener(
        "runtime.onConnect",
        Closure::wrap(Box::new(move |port: JsValue| {
            match web::attach_port(port) {
                Ok(channel) => {
                    let _ = connections.connect(channel);
                }
                Err(error) => {
                    web_sys::console::warn_2(&"peerscope: unusable port".into(), &error)
                }
            }
        }) as Box<dyn FnMut(JsValue)>),
    )?;

    // chrome.tabs.onUpdated: (tabId, changeInfo, tab)
    web::add_listener(
        "tabs.onUpdated",
        Closure::wrap(Box::new(move |tab_id: JsValue, change: JsValue| {
            let complete = Reflect::get(&change, &"status".into())
                .ok()
                .and_then(|status| status.as_string())
                .is_some_and(|status| status == "complete");
            if let (true, Some(tab_id)) = (complete, tab_id.as_f64()) {
                handle.navigation_complete(ContextId::new(tab_id as u32));
            }
        }) as Box<dyn FnMut(JsValue, JsValue)>),
    )?;

    Ok(())
}
