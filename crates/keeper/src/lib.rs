//! Hierarchical Task Keepers
//!
//! A [`Keeper`] owns one concurrent task and an optional set of named child
//! keepers, forming a supervision tree without a central scheduler. Each
//! keeper runs three ordered handler lists:
//!
//! - **before**: guarded setup that can veto the start
//! - **listen**: the steady-state work, re-run on every restart
//! - **after**: guaranteed teardown, run once all children have stopped
//!
//! Cancellation flows parent → child through
//! [`tokio_util::sync::CancellationToken`]; handler panics are caught at the
//! keeper boundary.
//!
//! # Example
//!
//! ```ignore
//! use keeper::Keeper;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let root = Keeper::new("root");
//!     root.listen(|token| async move {
//!         token.cancelled().await;
//!         false
//!     });
//!
//!     let worker = Keeper::new("worker");
//!     worker.after(|_| async {
//!         println!("worker drained");
//!         false
//!     });
//!     root.add(&worker);
//!
//!     let handle = root.spawn(&CancellationToken::new()).unwrap();
//!     root.stop();
//!     handle.await.unwrap();
//! }
//! ```

mod config;
mod error;
mod handler;
mod keeper;

pub use config::KeeperConfig;
pub use error::KeeperError;
pub use handler::{Handler, PanicHandler, PanicPayload};
pub use keeper::{Keeper, KeeperState};

// Re-export the token type used by every handler signature
pub use tokio_util::sync::CancellationToken;
