use candle_core::Tensor;

use crate::cd::Gradients;
use crate::config::TrainingConfig;
use crate::error::Result;
use crate::params::ParameterStore;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearningRates {
    pub weights: f64,
    pub visible_bias: f64,
    pub hidden_bias: f64,
}

/// モーメンタム付きの更新。勾配 g、速度 v に対して
/// `v' = g + μ·v`、`T' = T − lr·v'`。
///
/// CD-k は「正の相 − 負の相」を反転して返すので、引くと対数尤度が上がる方向に動く
pub struct Momentum {
    lr: LearningRates,
    momentum: f64,
    weight_decay: f64,
    anneal_val: Option<f64>,
}

impl Momentum {
    pub fn new(config: &TrainingConfig) -> Self {
        Self {
            lr: LearningRates {
                weights: config.lr_weights,
                visible_bias: config.lr_vb,
                hidden_bias: config.lr_hb,
            },
            momentum: config.momentum,
            weight_decay: config.weight_decay,
            anneal_val: config.anneal.then_some(config.anneal_val),
        }
    }

    pub fn learning_rates(&self) -> LearningRates {
        self.lr
    }

    /// epoch の最初に1回呼ぶ。`lr = lr / (1 + epoch / anneal_val)` を
    /// 現在の学習率にかけるので、epoch をまたいで積み重なる
    pub fn anneal(&mut self, epoch: usize) {
        if let Some(anneal_val) = self.anneal_val {
            let divisor = 1.0 + epoch as f64 / anneal_val;
            self.lr.weights /= divisor;
            self.lr.visible_bias /= divisor;
            self.lr.hidden_bias /= divisor;
        }
    }

    pub fn step(&self, params: &mut ParameterStore, grads: &Gradients) -> Result<()> {
        // weights。decoupled weight decay (`T -= wd·T`、学習率はかけない) はここだけ
        let (mut weights, velocity) = momentum_update(
            params.weights(),
            params.weight_velocity(),
            &grads.weights,
            self.lr.weights,
            self.momentum,
        )?;
        if self.weight_decay > 0.0 {
            weights = (weights - params.weights().affine(self.weight_decay, 0.)?)?;
        }
        params.set_weights(&weights)?;
        params.set_weight_velocity(velocity)?;

        let (visible_bias, velocity) = momentum_update(
            params.visible_bias(),
            params.visible_bias_velocity(),
            &grads.visible_bias,
            self.lr.visible_bias,
            self.momentum,
        )?;
        params.set_visible_bias(&visible_bias)?;
        params.set_visible_bias_velocity(velocity)?;

        // hidden bias はバッチにいるユーザーの行だけ
        let rows = params.gather_hidden_bias_velocity(&grads.users)?;
        let rows = (&grads.hidden_bias + rows.affine(self.momentum, 0.)?)?;
        params.scatter_hidden_bias_velocity(&grads.user_ids, &rows)?;
        params.scatter_add_hidden_bias(&grads.user_ids, &rows.affine(-self.lr.hidden_bias, 0.)?)?;
        Ok(())
    }
}

/// (新しい値, 新しい速度)
fn momentum_update(
    value: &Tensor,
    velocity: &Tensor,
    grad: &Tensor,
    lr: f64,
    momentum: f64,
) -> Result<(Tensor, Tensor)> {
    let velocity = (grad + velocity.affine(momentum, 0.)?)?;
    let value = (value - velocity.affine(lr, 0.)?)?;
    // 演算グラフを次のバッチに持ち越さない
    Ok((value, velocity.detach()))
}
