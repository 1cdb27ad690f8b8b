//! Browser extension adapters.
//!
//! Wraps `chrome.runtime.Port`s as [`Channel`]s and implements the host
//! capability traits on top of the extension and page APIs. Envelopes cross
//! the JS boundary as plain objects, converted through their JSON form.

use async_trait::async_trait;
use js_sys::{Function, Object, Promise, Reflect};
use peerscope_protocol::{ContextId, Envelope};
use tracing::{debug, warn};
use wasm_bindgen::{JsCast, prelude::*};
use wasm_bindgen_futures::JsFuture;

use crate::{
    HostError, TransportError,
    channel::{self, Channel},
    host::{ClipboardWriter, PageBroadcast, PageConnector, PageProbe, ScriptExecutor},
    runtime,
};

/// Global the monitored library sets to `true` once it is loaded.
pub const INSTRUMENTATION_KEY: &str = "________libp2p_devtools_metrics";

/// `globalThis.chrome`.
pub fn chrome() -> Result<JsValue, JsValue> {
    let chrome = Reflect::get(&js_sys::global(), &"chrome".into())?;
    if chrome.is_undefined() || chrome.is_null() {
        return Err(JsValue::from_str("chrome extension APIs are not available"));
    }
    Ok(chrome)
}

/// Follow a dotted property path from `root`.
pub fn lookup(root: &JsValue, path: &str) -> Result<JsValue, JsValue> {
    path.split('.')
        .try_fold(root.clone(), |value, key| Reflect::get(&value, &key.into()))
}

fn method(target: &JsValue, name: &str) -> Result<Function, JsValue> {
    Reflect::get(target, &name.into())?
        .dyn_into::<Function>()
        .map_err(|_| JsValue::from_str(&format!("{name} is not a function")))
}

fn describe(error: JsValue) -> String {
    error
        .as_string()
        .or_else(|| {
            js_sys::JSON::stringify(&error)
                .ok()
                .and_then(|text| text.as_string())
        })
        .unwrap_or_else(|| format!("{error:?}"))
}

/// Convert an envelope into a structured-clone friendly object.
pub fn envelope_to_js(envelope: &Envelope) -> Result<JsValue, JsValue> {
    let json = envelope
        .to_json()
        .and_then(|value| serde_json::to_string(&value))
        .map_err(|error| JsValue::from_str(&error.to_string()))?;
    js_sys::JSON::parse(&json)
}

/// Parse an object received from a port or the page.
pub fn envelope_from_js(value: &JsValue) -> Option<Envelope> {
    let text = js_sys::JSON::stringify(value).ok()?.as_string()?;
    let json = serde_json::from_str(&text).ok()?;
    Envelope::from_json(json).ok()
}

/// Adopt a `chrome.runtime.Port` as a [`Channel`].
///
/// Port messages that are not envelopes are dropped. Closing the returned
/// channel disconnects the port, and the port disconnecting closes the
/// channel.
pub fn attach_port(port: JsValue) -> Result<Channel, JsValue> {
    let name = Reflect::get(&port, &"name".into())?
        .as_string()
        .unwrap_or_default();
    let (channel, mut host) = channel::host(&name);

    let inbound = host.handle();
    let on_message = Closure::wrap(Box::new(move |message: JsValue| {
        match envelope_from_js(&message) {
            Some(envelope) => {
                let _ = inbound.send(envelope);
            }
            None => debug!("Dropping non-envelope port message"),
        }
    }) as Box<dyn FnMut(JsValue)>);
    let target = Reflect::get(&port, &"onMessage".into())?;
    method(&target, "addListener")?.call1(&target, on_message.as_ref())?;
    on_message.forget();

    let disconnected = host.handle();
    let on_disconnect = Closure::wrap(Box::new(move |_port: JsValue| {
        disconnected.close();
    }) as Box<dyn FnMut(JsValue)>);
    let target = Reflect::get(&port, &"onDisconnect".into())?;
    method(&target, "addListener")?.call1(&target, on_disconnect.as_ref())?;
    on_disconnect.forget();

    runtime::spawn(async move {
        let post = match method(&port, "postMessage") {
            Ok(post) => post,
            Err(error) => return warn!(error = describe(error), "Port cannot post"),
        };
        while let Some(envelope) = host.outgoing().await {
            let sent = envelope_to_js(&envelope).and_then(|message| post.call1(&port, &message));
            if let Err(error) = sent {
                debug!(error = describe(error), "Port refused message");
                break;
            }
        }
        if let Ok(disconnect) = method(&port, "disconnect") {
            let _ = disconnect.call0(&port);
        }
    });

    Ok(channel)
}

/// Register `listener` on the `chrome` event at `path`, e.g.
/// `runtime.onConnect`. The listener lives as long as the context.
pub fn add_listener<F>(path: &str, listener: Closure<F>) -> Result<(), JsValue>
where
    F: ?Sized + wasm_bindgen::closure::WasmClosure,
{
    let event = lookup(&chrome()?, path)?;
    method(&event, "addListener")?.call1(&event, listener.as_ref())?;
    listener.forget();
    Ok(())
}

/// Opens page channels with `chrome.tabs.connect`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TabsConnector;

impl PageConnector for TabsConnector {
    fn connect(&self, context: ContextId, name: &str) -> Result<Channel, TransportError> {
        let unavailable = |error: JsValue| TransportError::Unavailable {
            name: name.to_string(),
            reason: describe(error),
        };

        let tabs = lookup(&chrome().map_err(unavailable)?, "tabs").map_err(unavailable)?;
        let options = Object::new();
        Reflect::set(&options, &"name".into(), &name.into()).map_err(unavailable)?;
        let port = method(&tabs, "connect")
            .and_then(|connect| connect.call2(&tabs, &context.get().into(), &options))
            .map_err(unavailable)?;
        attach_port(port).map_err(unavailable)
    }
}

/// Writes to a tab's clipboard by injecting a script with
/// `chrome.scripting.executeScript`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScriptingExecutor;

#[async_trait(?Send)]
impl ScriptExecutor for ScriptingExecutor {
    async fn copy_to_clipboard(&self, context: ContextId, text: &str) -> Result<(), HostError> {
        let failed = |error: JsValue| HostError::Failed(describe(error));

        let scripting = lookup(&chrome().map_err(|_| HostError::Missing("chrome"))?, "scripting")
            .map_err(failed)?;
        if scripting.is_undefined() {
            return Err(HostError::Missing("chrome.scripting"));
        }

        let target = Object::new();
        Reflect::set(&target, &"tabId".into(), &context.get().into()).map_err(failed)?;
        let injection = Object::new();
        Reflect::set(&injection, &"target".into(), &target).map_err(failed)?;
        Reflect::set(
            &injection,
            &"func".into(),
            &Function::new_with_args(
                "text",
                "const input = document.createElement('textarea');\
                 input.style.position = 'absolute';\
                 input.style.top = `${window.scrollY}px`;\
                 input.style.left = `${window.scrollX}px`;\
                 document.body.appendChild(input);\
                 input.value = text;\
                 input.focus();\
                 input.select();\
                 document.execCommand('copy');\
                 input.remove();",
            ),
        )
        .map_err(failed)?;
        Reflect::set(
            &injection,
            &"args".into(),
            &js_sys::Array::of1(&text.into()),
        )
        .map_err(failed)?;

        let promise: Promise = method(&scripting, "executeScript")
            .and_then(|execute| execute.call1(&scripting, &injection))
            .map_err(failed)?
            .unchecked_into();
        JsFuture::from(promise).await.map_err(failed)?;
        Ok(())
    }
}

/// `navigator.clipboard`, available to content scripts.
#[derive(Clone, Copy, Debug, Default)]
pub struct NavigatorClipboard;

#[async_trait(?Send)]
impl ClipboardWriter for NavigatorClipboard {
    async fn write_text(&self, text: &str) -> Result<(), HostError> {
        let failed = |error: JsValue| HostError::Failed(describe(error));
        let clipboard =
            lookup(&js_sys::global(), "navigator.clipboard").map_err(failed)?;
        if clipboard.is_undefined() {
            return Err(HostError::Missing("navigator.clipboard"));
        }
        let promise: Promise = method(&clipboard, "writeText")
            .and_then(|write| write.call1(&clipboard, &text.into()))
            .map_err(failed)?
            .unchecked_into();
        JsFuture::from(promise).await.map_err(failed)?;
        Ok(())
    }
}

/// `window.postMessage` into the page the content script runs in.
#[derive(Clone, Debug)]
pub struct WindowBroadcast {
    window: web_sys::Window,
}

impl WindowBroadcast {
    /// Broadcast on the current window.
    pub fn new() -> Result<Self, HostError> {
        web_sys::window()
            .map(|window| Self { window })
            .ok_or(HostError::Missing("window"))
    }
}

impl PageBroadcast for WindowBroadcast {
    fn post(&self, envelope: &Envelope) -> Result<(), HostError> {
        let message = envelope_to_js(envelope).map_err(|error| HostError::Failed(describe(error)))?;
        self.window
            .post_message(&message, "*")
            .map_err(|error| HostError::Failed(describe(error)))
    }
}

/// Asks the inspected page whether the monitored library is loaded, via
/// `chrome.devtools.inspectedWindow.eval`.
#[derive(Clone, Copy, Debug, Default)]
pub struct InspectedWindowProbe;

#[async_trait(?Send)]
impl PageProbe for InspectedWindowProbe {
    async fn is_instrumented(&self) -> Result<bool, HostError> {
        let inspected = lookup(
            &chrome().map_err(|_| HostError::Missing("chrome"))?,
            "devtools.inspectedWindow",
        )
        .map_err(|error| HostError::Failed(describe(error)))?;
        let eval = method(&inspected, "eval").map_err(|_| HostError::Missing("inspectedWindow.eval"))?;
        let expression = format!("globalThis.{INSTRUMENTATION_KEY} === true");

        let mut failure = None;
        let promise = Promise::new(&mut |resolve, reject| {
            let callback = Closure::once_into_js(move |result: JsValue, exception: JsValue| {
                if exception.is_truthy() {
                    let _ = reject.call1(&JsValue::UNDEFINED, &exception);
                } else {
                    let _ = resolve.call1(&JsValue::UNDEFINED, &result);
                }
            });
            if let Err(error) = eval.call2(&inspected, &expression.as_str().into(), &callback) {
                failure = Some(error);
            }
        });
        if let Some(error) = failure {
            return Err(HostError::Failed(describe(error)));
        }

        let result = JsFuture::from(promise)
            .await
            .map_err(|error| HostError::Failed(describe(error)))?;
        Ok(result.as_bool().unwrap_or(false))
    }
}
