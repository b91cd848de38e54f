#![forbid(unsafe_code)]

//! The local task scope stores schedule their background work in.
//!
//! Scheduled sync passes, debounce timers and async validator futures hold
//! `Rc` state, so they run as `tokio::task::spawn_local` tasks. tokio offers
//! no way to ask whether a `LocalSet` is current; `spawn_local` outside one
//! simply panics. A store therefore only spawns while a [`run_local`] (or
//! [`run_local_on`]) scope is being polled on this thread. Everywhere else,
//! including a plain `#[tokio::main]` body, it falls back to inline sync
//! validation and skips async validators.
//!
//! ```ignore
//! deepstate_runtime::run_local(async {
//!     let store = Store::new(state, actuators, StateOptions::new());
//!     store.data().set("name", "ada")?;   // pass scheduled for the next tick
//!     tokio::time::sleep(Duration::from_millis(1)).await;
//! })
//! .await;
//! ```
//!
//! # Invariants
//!
//! 1. The scope is open exactly while the wrapped `LocalSet` is polled, so
//!    every task it runs (the root future and all spawned tasks) sees it.
//! 2. Nested scopes restore the outer depth when they close.

use std::cell::Cell;
use std::future::{Future, poll_fn};
use std::pin::pin;

use tokio::task::LocalSet;

thread_local! {
    static LOCAL_DEPTH: Cell<u32> = const { Cell::new(0) };
}

struct ScopeGuard;

impl ScopeGuard {
    fn enter() -> Self {
        LOCAL_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        LOCAL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Whether store work may be spawned right now: a local scope is open and a
/// tokio runtime (for timers) is current.
#[must_use]
pub fn can_spawn() -> bool {
    LOCAL_DEPTH.with(Cell::get) > 0 && tokio::runtime::Handle::try_current().is_ok()
}

/// Run `future` on a fresh `LocalSet` with store scheduling enabled.
pub async fn run_local<F: Future>(future: F) -> F::Output {
    let local = LocalSet::new();
    run_local_on(&local, future).await
}

/// Run `future` on `local` with store scheduling enabled.
///
/// Tasks left on `local` when `future` completes stay there and only run
/// again under another scope.
pub async fn run_local_on<F: Future>(local: &LocalSet, future: F) -> F::Output {
    let mut run = pin!(local.run_until(future));
    poll_fn(|cx| {
        let _scope = ScopeGuard::enter();
        run.as_mut().poll(cx)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_outside_any_scope() {
        assert!(!can_spawn());
    }

    #[tokio::test]
    async fn plain_runtime_is_not_a_scope() {
        assert!(!can_spawn());
        let local = LocalSet::new();
        local.run_until(async { assert!(!can_spawn()) }).await;
    }

    #[tokio::test]
    async fn open_for_root_and_spawned_tasks() {
        run_local(async {
            assert!(can_spawn());
            let spawned = tokio::task::spawn_local(async { can_spawn() });
            assert!(spawned.await.expect("task"));
        })
        .await;
        assert!(!can_spawn());
    }

    #[test]
    fn nested_guards_restore_depth() {
        let depth = || LOCAL_DEPTH.with(Cell::get);
        let outer = ScopeGuard::enter();
        {
            let _inner = ScopeGuard::enter();
            assert_eq!(depth(), 2);
        }
        assert_eq!(depth(), 1);
        drop(outer);
        assert_eq!(depth(), 0);
    }
}
