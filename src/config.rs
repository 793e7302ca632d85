use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RbmError, Result};
use crate::types::RatingEncoding;

/// `rbm.toml` 全体。セクションを省略した場合はデフォルト値になる
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RbmConfig {
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub data: DataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// アイテム数 (visible unit の数)
    pub n_visible: usize,
    pub n_hidden: usize,
    /// 評価値の段階数 (1〜5 の星)
    pub num_rat: usize,
    pub n_users: usize,
    /// 重み初期化の標準偏差
    pub weight_std: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_visible: 17770,
            n_hidden: 100,
            num_rat: 5,
            n_users: 458293,
            weight_std: 0.01,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub momentum: f64,
    pub lr_weights: f64,
    pub lr_vb: f64,
    pub lr_hb: f64,
    /// weights にだけかける decoupled weight decay
    pub weight_decay: f64,
    pub anneal: bool,
    pub anneal_val: f64,
    /// 学習開始時の Gibbs ステップ数
    pub k: usize,
    /// この epoch (0始まり) から `k_increased` ステップに切り替える
    pub k_increase_epoch: usize,
    pub k_increased: usize,
    /// 0 なら途中のチェックポイントは保存しない
    pub checkpoint_every: usize,
    pub checkpoint_dir: PathBuf,
    pub seed: u64,
    /// 予測時に hidden をサンプリングせず確率のまま使う
    pub mean_field_prediction: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 128,
            momentum: 0.9,
            lr_weights: 0.0015,
            lr_vb: 0.0015,
            lr_hb: 0.1,
            weight_decay: 0.0,
            anneal: false,
            anneal_val: 0.0,
            k: 1,
            k_increase_epoch: 42,
            k_increased: 3,
            checkpoint_every: 5,
            checkpoint_dir: PathBuf::from("checkpoints"),
            seed: 42,
            mean_field_prediction: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub train_path: PathBuf,
    pub probe_path: PathBuf,
    pub qual_path: Option<PathBuf>,
    pub item_frequencies_path: PathBuf,
    pub submission_path: PathBuf,
    /// rating 列が星の数 (`stars`) か 1 引いた値 (`shifted`) か
    pub rating_encoding: RatingEncoding,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            train_path: PathBuf::from("data/train.csv"),
            probe_path: PathBuf::from("data/probe.csv"),
            qual_path: None,
            item_frequencies_path: PathBuf::from("data/movie_frequencies.dta"),
            submission_path: PathBuf::from("rbm.txt"),
            rating_encoding: RatingEncoding::Stars,
        }
    }
}

impl RbmConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: RbmConfig = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let m = &self.model;
        if m.n_visible == 0 || m.n_hidden == 0 || m.num_rat == 0 || m.n_users == 0 {
            return Err(RbmError::Config(format!(
                "model dimensions must be positive: n_visible={}, n_hidden={}, num_rat={}, n_users={}",
                m.n_visible, m.n_hidden, m.num_rat, m.n_users
            )));
        }
        let t = &self.training;
        if t.batch_size == 0 {
            return Err(RbmError::Config("batch_size must be positive".to_string()));
        }
        if t.k == 0 || t.k_increased == 0 {
            return Err(RbmError::Config("Gibbs steps must be at least 1".to_string()));
        }
        // anneal_val で割るので 0 は不可
        if t.anneal && t.anneal_val <= 0.0 {
            return Err(RbmError::Config(format!(
                "anneal_val must be positive when annealing is enabled, got {}",
                t.anneal_val
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RbmConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model.n_visible, 17770);
        assert_eq!(config.model.n_users, 458293);
        assert_eq!(config.training.k_increase_epoch, 42);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let text = r#"
            [model]
            n_visible = 10
            n_users = 3

            [training]
            anneal = true
            anneal_val = 10.0
        "#;
        let config: RbmConfig = toml::from_str(text).unwrap();
        assert_eq!(config.model.n_visible, 10);
        assert_eq!(config.model.n_hidden, 100);
        assert_eq!(config.training.batch_size, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_anneal_without_value_is_rejected() {
        let mut config = RbmConfig::default();
        config.training.anneal = true;
        config.training.anneal_val = 0.0;
        assert!(matches!(config.validate(), Err(RbmError::Config(_))));
    }
}
