//! Ports - 抽象化レイヤー
//!
//! ジョブランタイム側が実装するインターフェース。
//! The retry policy never talks to a concrete storage engine: it only sees
//! these traits, handed in explicitly by whoever constructs it.

pub mod clock;
pub mod filter;
pub mod hash_store;
pub mod job_storage;
pub mod job_parameters;
pub mod transaction;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::filter::{
    ApplyStateContext, ApplyStateFilter, DEFAULT_JOB_EXPIRATION, ElectStateContext,
    ElectStateFilter,
};
pub use self::hash_store::HashStore;
pub use self::job_storage::JobStorage;
pub use self::job_parameters::JobParameterStore;
pub use self::transaction::WriteTransaction;
