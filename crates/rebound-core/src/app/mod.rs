//! App - アプリケーション層
//!
//! ports と policy を組み合わせて、ジョブの状態遷移を実行します。
//!
//! # 主要コンポーネント
//! - **StatePipeline**: election → unapply → apply → commit

pub mod pipeline;

pub use self::pipeline::{StatePipeline, TRIGGERED_REASON};
