//! Durable offline mutation queue with retrying, single-flight replay.
//!
//! Writes made while disconnected are enqueued as [`op::OperationRecord`]s,
//! persisted as a full snapshot after every change, and later replayed in
//! insertion order through a caller-supplied [`runtime::executor::Executor`].
//!
//! # Examples
//!
//! Engine usage with an in-memory store:
//! ```
//! use offqueue::{
//!     config::QueueConfig,
//!     core::queue::QueueEngine,
//!     op::NewOperation,
//!     persist::memory::MemoryStore,
//!     types::{OpKind, OpStatus},
//! };
//!
//! let mut engine = QueueEngine::open(MemoryStore::new(), QueueConfig::default());
//! let id = engine
//!     .add(NewOperation::new(OpKind::Create, "meal_plan", serde_json::json!({ "day": 1 })))
//!     .expect("add");
//! assert_eq!(engine.get(id).map(|r| r.status), Some(OpStatus::Pending));
//! ```
//!
//! Draining through an executor with a SQLite store:
//! ```no_run
//! use offqueue::{
//!     config::QueueConfig,
//!     op::{NewOperation, OperationRecord},
//!     persist::sqlite::SqliteQueueStore,
//!     runtime::{executor::ExecutorError, handle::OfflineQueue},
//!     types::OpKind,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = SqliteQueueStore::open("queue.db").expect("open sqlite");
//! let queue = OfflineQueue::open(store, QueueConfig::default());
//! queue
//!     .add(NewOperation::new(OpKind::Update, "recipe", serde_json::json!({ "id": 7 })))
//!     .expect("add");
//!
//! let send = |op: OperationRecord| async move {
//!     println!("sending {} {}", op.entity, op.id);
//!     Ok::<(), ExecutorError>(())
//! };
//! let report = queue.process(&send).await.expect("drain");
//! assert_eq!(report.completed, 1);
//! queue.close().await.expect("close");
//! # }
//! ```

pub mod config;
pub mod core;
pub mod op;
pub mod persist;
pub mod runtime;
pub mod status;
pub mod types;
