//! k ステップの Gibbs サンプリングによる contrastive divergence (CD-k)

use candle_core::Tensor;

use crate::datasets::RatingBatch;
use crate::error::Result;
use crate::params::ParameterStore;
use crate::propagator::{backward, forward, items_major};
use crate::sampler::Sampler;

/// CD-k の結果。すべて「正の相 − 負の相」の符号を反転した値で、
/// 形状は対応するパラメータと同じ (hidden_bias だけはバッチの行)
pub struct Gradients {
    /// (n_visible, num_rat, n_hidden)
    pub weights: Tensor,
    /// (num_rat, n_visible)
    pub visible_bias: Tensor,
    /// (batch, n_hidden)。`user_ids` と同じ順
    pub hidden_bias: Tensor,
    pub users: Tensor,
    pub user_ids: Vec<u32>,
    /// 実際に回した Gibbs ステップ数
    pub gibbs_steps: usize,
}

pub struct CdEngine {
    k: usize,
}

impl CdEngine {
    pub fn new(k: usize) -> Self {
        Self { k: k.max(1) }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn set_k(&mut self, k: usize) {
        self.k = k.max(1);
    }

    pub fn compute(
        &self,
        params: &ParameterStore,
        sampler: &mut Sampler,
        batch: &RatingBatch,
    ) -> Result<Gradients> {
        let mask = batch.mask()?;
        self.cd_k(params, sampler, &batch.visible, &mask, &batch.users, &batch.user_ids)
    }

    /// パラメータは読むだけ。更新は Optimizer がまとめて行うので、
    /// このバッチの計算中はずっと更新前の hidden bias を見ている
    pub fn cd_k(
        &self,
        params: &ParameterStore,
        sampler: &mut Sampler,
        visible: &Tensor,
        mask: &Tensor,
        users: &Tensor,
        user_ids: &[u32],
    ) -> Result<Gradients> {
        // 正の相: hidden は確率的にサンプリング
        let orig_hidden = sampler.sample_hidden(&forward(params, visible, users)?, true)?;

        let mut hidden = orig_hidden.clone();
        let mut visible_samples = visible.zeros_like()?;
        let mut gibbs_steps = 0;
        for step in 0..self.k {
            // 再構成は常に mean-field。未評価のアイテムはマスクで 0 にする
            visible_samples = (sampler.sample_visible(&backward(params, &hidden)?, false)? * mask)?;
            // 最後のステップだけ mean-field にしてノイズを減らす
            let last = step + 1 == self.k;
            hidden = sampler.sample_hidden(&forward(params, &visible_samples, users)?, !last)?;
            gibbs_steps += 1;
        }

        let w_pos = outer(&orig_hidden, visible)?;
        let w_neg = outer(&hidden, &visible_samples)?;

        Ok(Gradients {
            weights: (w_neg - w_pos)?,
            visible_bias: (&visible_samples - visible)?.sum(0)?,
            hidden_bias: (&hidden - &orig_hidden)?,
            users: users.clone(),
            user_ids: user_ids.to_vec(),
            gibbs_steps,
        })
    }
}

/// バッチで和をとった hidden ⊗ visible。weights と同じ (n_visible, num_rat, n_hidden)
fn outer(hidden: &Tensor, visible: &Tensor) -> Result<Tensor> {
    let (_, num_rat, n_visible) = visible.dims3()?;
    let n_hidden = hidden.dim(1)?;
    Ok(items_major(visible)?
        .t()?
        .matmul(hidden)?
        .reshape((n_visible, num_rat, n_hidden))?)
}
