//! Browser transport — `window.postMessage` via `web-sys`.
//!
//! Listens for `message` events on the LOCAL window (the only place a browser
//! delivers them) and posts to the bound PEER window: the parent/opener when
//! running inside the wallet surface, or the iframe/popup when running on the
//! host page.

use std::sync::Arc;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{MessageEvent, Window};

use crate::error::TransportError;

use super::{Envelope, Handler, Inbound, Listeners, Subscription, Transport};

/// `postMessage`-backed [`Transport`] bound to one peer window.
pub struct WindowTransport {
    local: Window,
    peer: Window,
    listeners: Arc<Listeners>,
    on_message: Closure<dyn FnMut(MessageEvent)>,
}

impl WindowTransport {
    /// Bind to `peer` and start listening on the current global window.
    pub fn new(peer: Window) -> Result<Self, TransportError> {
        let local = web_sys::window()
            .ok_or_else(|| TransportError::ConnectionFailed("No global window".into()))?;
        let listeners = Listeners::new();

        let sink = Arc::clone(&listeners);
        let on_message = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
            dispatch_event(&sink, &event);
        });

        local
            .add_event_listener_with_callback("message", on_message.as_ref().unchecked_ref())
            .map_err(|e| TransportError::ConnectionFailed(extract_js_error(&e)))?;

        Ok(Self {
            local,
            peer,
            listeners,
            on_message,
        })
    }

    /// Bind to `window.parent` (iframe mode).
    pub fn to_parent() -> Result<Self, TransportError> {
        let local = web_sys::window()
            .ok_or_else(|| TransportError::ConnectionFailed("No global window".into()))?;
        let parent = local
            .parent()
            .map_err(|e| TransportError::ConnectionFailed(extract_js_error(&e)))?
            .ok_or(TransportError::NotConnected)?;
        Self::new(parent)
    }

    /// Bind to `window.opener` (popup mode).
    pub fn to_opener() -> Result<Self, TransportError> {
        let local = web_sys::window()
            .ok_or_else(|| TransportError::ConnectionFailed("No global window".into()))?;
        let opener = local
            .opener()
            .map_err(|e| TransportError::ConnectionFailed(extract_js_error(&e)))?;
        if opener.is_null() || opener.is_undefined() {
            return Err(TransportError::NotConnected);
        }
        Self::new(opener.unchecked_into::<Window>())
    }

    /// `window.location.origin` of the current page.
    pub fn self_origin() -> Option<String> {
        web_sys::window()?.location().origin().ok()
    }
}

impl Transport for WindowTransport {
    fn post(&self, envelope: &Envelope, target_origin: &str) -> Result<(), TransportError> {
        let json = envelope
            .to_json()
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        let value = js_sys::JSON::parse(&json)
            .map_err(|e| TransportError::SendFailed(extract_js_error(&e)))?;
        self.peer
            .post_message(&value, target_origin)
            .map_err(|e| TransportError::SendFailed(extract_js_error(&e)))
    }

    fn subscribe(&self, handler: Handler) -> Subscription {
        self.listeners.add(handler)
    }
}

impl Drop for WindowTransport {
    fn drop(&mut self) {
        let _ = self
            .local
            .remove_event_listener_with_callback("message", self.on_message.as_ref().unchecked_ref());
        self.listeners.clear();
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn dispatch_event(listeners: &Listeners, event: &MessageEvent) {
    let data = event.data();
    let text = match data.as_string() {
        Some(s) => s,
        None => match js_sys::JSON::stringify(&data) {
            Ok(s) => String::from(s),
            Err(_) => return,
        },
    };

    // Pages receive unrelated messages (extensions, devtools); ignore quietly.
    match Envelope::from_json(&text) {
        Ok(envelope) => listeners.dispatch(&Inbound {
            origin: event.origin(),
            envelope,
        }),
        Err(e) => tracing::debug!("Ignoring non-envelope message: {}", e),
    }
}

/// Extract a human-readable message from a JS exception value.
fn extract_js_error(err: &JsValue) -> String {
    if let Some(error) = err.dyn_ref::<js_sys::Error>() {
        let name = error.name().as_string().unwrap_or_else(|| "Error".to_string());
        let message = error.message().as_string().unwrap_or_default();
        if !message.is_empty() {
            return format!("{}: {}", name, message);
        }
        return name;
    }

    if let Ok(json_str) = js_sys::JSON::stringify(err) {
        if let Some(s) = json_str.as_string() {
            if !s.is_empty() && s != "null" && s != "undefined" {
                return s;
            }
        }
    }

    format!("{:?}", err)
}
