//! Task spawning and timers for native and browser targets.
//!
//! | Operation | Native | `wasm32` |
//! |-----------|--------|----------|
//! | spawn | `tokio::spawn` | `wasm_bindgen_futures::spawn_local` |
//! | sleep | `tokio::time::sleep` | `gloo_timers::future::sleep` |

use std::{future::Future, time::Duration};

use crate::sync::ConditionalSend;

/// Run `future` to completion in the background.
#[cfg(not(target_arch = "wasm32"))]
pub fn spawn<F>(future: F)
where
    F: Future<Output = ()> + ConditionalSend + 'static,
{
    tokio::spawn(future);
}

/// Run `future` to completion in the background.
#[cfg(target_arch = "wasm32")]
pub fn spawn<F>(future: F)
where
    F: Future<Output = ()> + ConditionalSend + 'static,
{
    wasm_bindgen_futures::spawn_local(future);
}

/// Wait for `duration` to pass.
#[cfg(not(target_arch = "wasm32"))]
pub async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Wait for `duration` to pass.
#[cfg(target_arch = "wasm32")]
pub async fn sleep(duration: Duration) {
    gloo_timers::future::sleep(duration).await;
}

/// Wait for `duration` if one is given, otherwise forever.
pub async fn deadline(duration: Option<Duration>) {
    match duration {
        Some(duration) => sleep(duration).await,
        None => std::future::pending().await,
    }
}
