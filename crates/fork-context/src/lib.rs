//! # sipfork fork-context
//!
//! Forking of SIP MESSAGE requests to every device of a recipient, with
//! the fork state moved to durable storage while it waits, and push
//! notifications for devices that must be woken up first.
//!
//! - [`ForkMessageContext`]: branch bookkeeping and final response selection
//! - [`ForkMessageContextDbProxy`]: wraps a context and swaps it out to a
//!   [`ForkMessageRepository`] whenever every branch answered
//! - [`RemotePushStrategy`]: sends and re-sends push notifications for a
//!   [`PushBranch`]
//!
//! ```no_run
//! use std::sync::Arc;
//! use sipfork_fork_context::{ForkConfig, ForkMessageContextDbProxy, SqliteForkRepository};
//!
//! # async fn run() -> sipfork_fork_context::Result<()> {
//! let config = ForkConfig::load("fork.toml")?;
//! let repository = Arc::new(SqliteForkRepository::connect("sqlite://forks.db").await?);
//! for proxy in ForkMessageContextDbProxy::restore_all(repository, None).await? {
//!     if proxy.is_finished().await? {
//!         continue;
//!     }
//!     println!("pending message {}", proxy.call_id());
//! }
//! # let _ = config;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod proxy;
pub mod push;
pub mod record;
pub mod repository;

pub use self::config::ForkConfig;
pub use context::{Branch, FinalResponse, ForkMessageContext, RequestSummary, DEFAULT_PRIORITY};
pub use error::{ForkError, Result};
pub use proxy::{ForkContextListener, ForkMessageContextDbProxy, ProxyState};
pub use push::{BranchListener, ForkCanceler, ForkStatus, PushBranch, PushInfo, PushService, PushType, RemotePushStrategy};
pub use record::ForkMessageRecord;
pub use repository::{ForkMessageRepository, InMemoryForkRepository, SqliteForkRepository};
