//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryStorage**: hash / set / job parameter / transaction を 1 つで提供
//!
//! 本番用のストレージ（Redis, SQL など）は別クレートで同じ ports を実装します。

pub mod memory;

pub use self::memory::{InMemoryStorage, JobRecord};
