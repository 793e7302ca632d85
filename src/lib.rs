//! RBM (Restricted Boltzmann Machine) による協調フィルタリング。
//!
//! ユーザーごとの疎な評価ベクトルを one-hot にして、CD-k で学習し、
//! 未評価のアイテムの評価値を再構成から予測する。

pub mod cd;
pub mod checkpoint;
pub mod config;
pub mod datasets;
pub mod error;
pub mod evaluator;
pub mod loss;
pub mod metrics;
pub mod optimizer;
pub mod params;
pub mod propagator;
pub mod sampler;
pub mod trainer;
pub mod types;

pub use error::{RbmError, Result};
