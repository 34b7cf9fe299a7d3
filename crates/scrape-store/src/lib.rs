mod error;
mod pool;
mod recovery;
mod row;
mod store;

pub use error::map_sqlx_error;
pub use pool::{connect, PoolConfig, StoreConfig};
pub use recovery::recover_on_startup;
pub use store::{JobFilter, JobPatch, JobSort, Page, PageResult, SortDirection, SortField, Store};

pub use sqlx::PgPool;
