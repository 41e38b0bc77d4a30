pub mod credentials;
pub mod document_store;
pub mod events;
pub mod item_store;
pub mod persistence;
pub mod preferences;
pub mod remote;
pub mod retry;
pub mod sync;
pub mod task;
pub mod task_backend;
pub mod task_csv;
pub mod task_store;
pub mod wire;

pub use credentials::{CredentialProvider, KeyringCredentials, StaticToken};
pub use document_store::DocumentTaskStore;
pub use events::{SyncEvent, SyncOutcome};
pub use item_store::{Bucket, ItemStore};
pub use persistence::{Persistence, StorageBackend};
pub use preferences::Preferences;
pub use remote::{InFlightCounter, InFlightGuard, RemoteClient, RemoteError, RemoteSettings};
pub use retry::{InstantTimer, RetryConfig, Timer, TokioTimer};
pub use sync::{SyncEngine, SyncEngineParts};
pub use task::{Category, Importance, Task, TaskEdit, TaskError, TaskId};
pub use task_backend::{Filter, SortOrder, StorageError, TaskBackend};
pub use task_csv::CsvError;
pub use task_store::SqliteTaskStore;
