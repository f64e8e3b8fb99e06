//! rebound-core
//!
//! Persisted retry policy for background jobs.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, decision, errors）
//! - **ports**: 抽象化レイヤー（HashStore, JobParameterStore, WriteTransaction, filters, Clock）
//! - **policy**: リトライ設定・バックオフ・判定エンジン・永続化された上書き設定
//! - **app**: 状態遷移パイプライン
//! - **impls**: 実装（InMemoryStorage など開発用）
//! - **config**: JSON から読む実行時設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod policy;
pub mod ports;

pub use app::StatePipeline;
pub use config::{PolicySettings, RuntimeSettings};
pub use domain::{JobFailure, JobId, JobState, PolicyKey, ReboundError, RetryDecision};
pub use impls::InMemoryStorage;
pub use policy::{AttemptsExceededAction, PersistedRetryPolicy, RetryConfiguration};
