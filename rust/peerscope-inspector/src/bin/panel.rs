//! Devtools panel entry point.
//!
//! Connects to the relay for the inspected tab, runs the RPC session and
//! node detection, and reports every status change to the panel page as a
//! `peerscope:status` event carrying the status as JSON.

fn main() {
    #[cfg(all(target_arch = "wasm32", target_os = "unknown"))]
    {
        console_error_panic_hook::set_once();
        if let Err(error) = start() {
            web_sys::console::error_2(&"peerscope: could not start panel".into(), &error);
        }
    }
}

#[cfg(all(target_arch = "wasm32", target_os = "unknown"))]
fn start() -> Result<(), wasm_bindgen::JsValue> {
    use std::sync::Arc;

    use js_sys::{Object, Reflect};
    use peerscope_inspector::{
        config::InspectorConfig,
        inspector::Inspector,
        metrics::MetricsClient,
        rpc::{Role, RpcSession},
        runtime,
        web::{self, InspectedWindowProbe},
    };
    use peerscope_protocol::ContextId;
    use wasm_bindgen::{JsCast, prelude::*};

    let chrome = web::chrome()?;
    let tab_id = web::lookup(&chrome, "devtools.inspectedWindow.tabId")?
        .as_f64()
        .ok_or_else(|| JsValue::from_str("no inspected tab"))?;

    let config = InspectorConfig::default();
    let options = Object::new();
    Reflect::set(&options, &"name".into(), &config.channels.inspector.as_str().into())?;
    let runtime_api = Reflect::get(&chrome, &"runtime".into())?;
    let connect: js_sys::Function = Reflect::get(&runtime_api, &"connect".into())?.unchecked_into();
    let port = connect.call1(&runtime_api, &options)?;
    let channel = web::attach_port(port)?;

    let (session, rpc, events) = RpcSession::new(
        channel,
        Role::Inspector(ContextId::new(tab_id as u32)),
        &config.session,
    );
    let (inspector, mut status) = Inspector::new(
        MetricsClient::new(rpc),
        events,
        Arc::new(InspectedWindowProbe),
        &config.session,
    );
    runtime::spawn(session.run());
    runtime::spawn(inspector.run());

    runtime::spawn(async move {
        loop {
            let json = serde_json::to_string(&*status.borrow_and_update()).unwrap_or_default();
            if let Some(window) = web_sys::window() {
                let detail = js_sys::JSON::parse(&json).unwrap_or(JsValue::NULL);
                let init = Object::new();
                let _ = Reflect::set(&init, &"detail".into(), &detail);
                let event = js_sys::Reflect::construct(
                    &Reflect::get(&window, &"CustomEvent".into())
                        .unwrap_or(JsValue::UNDEFINED)
                        .unchecked_into(),
                    &js_sys::Array::of2(&"peerscope:status".into(), &init),
                );
                if let Ok(event) = event {
                    let _ = window.dispatch_event(event.unchecked_ref());
                }
            }
            if status.changed().await.is_err() {
                break;
            }
        }
    });

    Ok(())
}
