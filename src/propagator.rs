//! visible ↔ hidden の条件付き確率。状態は持たず、パラメータは借りるだけ

use candle_core::Tensor;

use crate::error::{RbmError, Result};
use crate::params::ParameterStore;

/// hidden unit が 1 になる確率。
///
/// `visible`: (batch, num_rat, n_visible) の one-hot (または再構成確率)、
/// `users`: (batch,) の u32。戻り値は (batch, n_hidden)
pub fn forward(params: &ParameterStore, visible: &Tensor, users: &Tensor) -> Result<Tensor> {
    let (batch, num_rat, n_visible) = visible.dims3()?;
    if num_rat != params.num_rat() || n_visible != params.n_visible() {
        return Err(RbmError::ShapeMismatch {
            name: "visible".to_string(),
            expected: vec![batch, params.num_rat(), params.n_visible()],
            actual: visible.dims().to_vec(),
        });
    }

    let hidden_bias = params.gather_hidden_bias(users)?;
    // (n_visible * num_rat, n_hidden)
    let weights = params
        .weights()
        .reshape((n_visible * num_rat, params.n_hidden()))?;

    // 評価段階とアイテムの軸をまとめて縮約する
    let pre_activation = (items_major(visible)?.matmul(&weights)? + hidden_bias)?;
    Ok(candle_nn::ops::sigmoid(&pre_activation)?)
}

/// visible の再構成確率。アイテムごとに評価段階の軸で softmax をとるので、
/// 各アイテムの確率の和は 1 になる。
///
/// `hidden`: (batch, n_hidden)。戻り値は (batch, num_rat, n_visible)
pub fn backward(params: &ParameterStore, hidden: &Tensor) -> Result<Tensor> {
    let (batch, n_hidden) = hidden.dims2()?;
    if n_hidden != params.n_hidden() {
        return Err(RbmError::ShapeMismatch {
            name: "hidden".to_string(),
            expected: vec![batch, params.n_hidden()],
            actual: hidden.dims().to_vec(),
        });
    }
    let (n_visible, num_rat) = (params.n_visible(), params.num_rat());

    let weights = params.weights().reshape((n_visible * num_rat, n_hidden))?;
    let logits = hidden
        .matmul(&weights.t()?)?
        .reshape((batch, n_visible, num_rat))?
        .transpose(1, 2)?
        .broadcast_add(params.visible_bias())?;
    Ok(candle_nn::ops::softmax(&logits, 1)?)
}

/// (batch, num_rat, n_visible) → (batch, n_visible * num_rat)。weights と同じ並び
pub(crate) fn items_major(visible: &Tensor) -> Result<Tensor> {
    let (batch, num_rat, n_visible) = visible.dims3()?;
    Ok(visible
        .transpose(1, 2)?
        .contiguous()?
        .reshape((batch, n_visible * num_rat))?)
}
