use std::path::Path;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Init, VarBuilder, VarMap};

use crate::config::ModelConfig;
use crate::error::{RbmError, Result};

pub const WEIGHTS: &str = "weights";
pub const HIDDEN_BIAS: &str = "hidden_bias";
pub const VISIBLE_BIAS: &str = "visible_bias";

/// RBM の学習パラメータとモーメンタムの速度。
///
/// - weights: (n_visible, num_rat, n_hidden)
/// - hidden_bias: (n_users, n_hidden)。ユーザーごとの行をインデックスで読み書きする
/// - visible_bias: (num_rat, n_visible)
///
/// 速度バッファはそれぞれ同じ形状で 0 初期化。チェックポイントには含めない
pub struct ParameterStore {
    varmap: VarMap,
    weights: Var,
    hidden_bias: Var,
    visible_bias: Var,
    weight_velocity: Tensor,
    hidden_bias_velocity: Tensor,
    visible_bias_velocity: Tensor,
    n_visible: usize,
    num_rat: usize,
    n_hidden: usize,
    n_users: usize,
}

impl ParameterStore {
    /// `visible_prior` は (num_rat, n_visible) の row-major
    pub fn new(model: &ModelConfig, visible_prior: &[f32], device: &Device) -> Result<Self> {
        let mut store = Self::build(
            model,
            Init::Randn {
                mean: 0.,
                stdev: model.weight_std,
            },
            device,
        )?;
        let prior_len = model.num_rat * model.n_visible;
        if visible_prior.len() != prior_len {
            return Err(RbmError::ShapeMismatch {
                name: VISIBLE_BIAS.to_string(),
                expected: vec![model.num_rat, model.n_visible],
                actual: vec![visible_prior.len()],
            });
        }
        let prior = Tensor::from_slice(visible_prior, (model.num_rat, model.n_visible), device)?;
        store.set_visible_bias(&prior)?;
        Ok(store)
    }

    /// 全パラメータ 0 で作る。チェックポイントを読み込む前の器として使う
    pub fn zeros(model: &ModelConfig, device: &Device) -> Result<Self> {
        Self::build(model, Init::Const(0.), device)
    }

    fn build(model: &ModelConfig, weight_init: Init, device: &Device) -> Result<Self> {
        let (n_visible, num_rat, n_hidden, n_users) =
            (model.n_visible, model.num_rat, model.n_hidden, model.n_users);

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        vb.get_with_hints((n_visible, num_rat, n_hidden), WEIGHTS, weight_init)?;
        vb.get_with_hints((n_users, n_hidden), HIDDEN_BIAS, Init::Const(0.))?;
        vb.get_with_hints((num_rat, n_visible), VISIBLE_BIAS, Init::Const(0.))?;

        let (weights, hidden_bias, visible_bias) = {
            let data = varmap
                .data()
                .lock()
                .map_err(|_| RbmError::Config("parameter map lock poisoned".to_string()))?;
            let get = |name: &str| {
                data.get(name).cloned().ok_or_else(|| {
                    RbmError::Config(format!("parameter {name} was not registered"))
                })
            };
            (get(WEIGHTS)?, get(HIDDEN_BIAS)?, get(VISIBLE_BIAS)?)
        };

        let weight_velocity = Tensor::zeros((n_visible, num_rat, n_hidden), DType::F32, device)?;
        let hidden_bias_velocity = Tensor::zeros((n_users, n_hidden), DType::F32, device)?;
        let visible_bias_velocity = Tensor::zeros((num_rat, n_visible), DType::F32, device)?;

        Ok(Self {
            varmap,
            weights,
            hidden_bias,
            visible_bias,
            weight_velocity,
            hidden_bias_velocity,
            visible_bias_velocity,
            n_visible,
            num_rat,
            n_hidden,
            n_users,
        })
    }

    pub fn n_visible(&self) -> usize {
        self.n_visible
    }

    pub fn num_rat(&self) -> usize {
        self.num_rat
    }

    pub fn n_hidden(&self) -> usize {
        self.n_hidden
    }

    pub fn n_users(&self) -> usize {
        self.n_users
    }

    pub fn device(&self) -> &Device {
        self.weights.device()
    }

    pub fn weights(&self) -> &Tensor {
        self.weights.as_tensor()
    }

    pub fn visible_bias(&self) -> &Tensor {
        self.visible_bias.as_tensor()
    }

    pub fn hidden_bias(&self) -> &Tensor {
        self.hidden_bias.as_tensor()
    }

    pub fn set_weights(&self, value: &Tensor) -> Result<()> {
        check_shape(WEIGHTS, self.weights.dims(), value)?;
        Ok(self.weights.set(value)?)
    }

    pub fn set_visible_bias(&self, value: &Tensor) -> Result<()> {
        check_shape(VISIBLE_BIAS, self.visible_bias.dims(), value)?;
        Ok(self.visible_bias.set(value)?)
    }

    pub fn set_hidden_bias(&self, value: &Tensor) -> Result<()> {
        check_shape(HIDDEN_BIAS, self.hidden_bias.dims(), value)?;
        Ok(self.hidden_bias.set(value)?)
    }

    /// バッチのユーザーの hidden bias 行を集める。(batch, n_hidden)
    pub fn gather_hidden_bias(&self, users: &Tensor) -> Result<Tensor> {
        self.check_users(&users.to_vec1::<u32>()?)?;
        Ok(self.hidden_bias.index_select(users, 0)?)
    }

    /// `delta` の各行を対応するユーザーの行に足す。バッチにいないユーザーの行は触らない
    pub fn scatter_add_hidden_bias(&self, user_ids: &[u32], delta: &Tensor) -> Result<()> {
        self.check_users(user_ids)?;
        check_shape(HIDDEN_BIAS, &[user_ids.len(), self.n_hidden], delta)?;
        for (row, &user) in user_ids.iter().enumerate() {
            let user = user as usize;
            let current = self.hidden_bias.narrow(0, user, 1)?;
            let updated = (current + delta.narrow(0, row, 1)?)?;
            self.hidden_bias.slice_set(&updated, 0, user)?;
        }
        Ok(())
    }

    pub fn weight_velocity(&self) -> &Tensor {
        &self.weight_velocity
    }

    pub fn visible_bias_velocity(&self) -> &Tensor {
        &self.visible_bias_velocity
    }

    pub fn hidden_bias_velocity(&self) -> &Tensor {
        &self.hidden_bias_velocity
    }

    pub fn set_weight_velocity(&mut self, value: Tensor) -> Result<()> {
        check_shape("weight velocity", self.weight_velocity.dims(), &value)?;
        self.weight_velocity = value;
        Ok(())
    }

    pub fn set_visible_bias_velocity(&mut self, value: Tensor) -> Result<()> {
        check_shape("visible bias velocity", self.visible_bias_velocity.dims(), &value)?;
        self.visible_bias_velocity = value;
        Ok(())
    }

    pub fn gather_hidden_bias_velocity(&self, users: &Tensor) -> Result<Tensor> {
        self.check_users(&users.to_vec1::<u32>()?)?;
        Ok(self.hidden_bias_velocity.index_select(users, 0)?)
    }

    /// バッチのユーザーの速度行を `rows` で置き換える
    pub fn scatter_hidden_bias_velocity(&self, user_ids: &[u32], rows: &Tensor) -> Result<()> {
        self.check_users(user_ids)?;
        check_shape("hidden bias velocity", &[user_ids.len(), self.n_hidden], rows)?;
        for (row, &user) in user_ids.iter().enumerate() {
            let src = rows.narrow(0, row, 1)?.contiguous()?;
            self.hidden_bias_velocity.slice_set(&src, 0, user as usize)?;
        }
        Ok(())
    }

    fn check_users(&self, user_ids: &[u32]) -> Result<()> {
        match user_ids.iter().find(|&&u| u as usize >= self.n_users) {
            Some(&index) => Err(RbmError::UserOutOfRange {
                index,
                n_users: self.n_users,
            }),
            None => Ok(()),
        }
    }

    /// weights / hidden_bias / visible_bias を safetensors に書く
    pub fn save(&self, path: &Path) -> Result<()> {
        self.varmap.save(path)?;
        Ok(())
    }

    /// 保存済みの値で上書きする。形状が違えばエラー
    pub fn load(&mut self, path: &Path) -> Result<()> {
        self.varmap.load(path)?;
        Ok(())
    }
}

fn check_shape(name: &str, expected: &[usize], value: &Tensor) -> Result<()> {
    if value.dims() != expected {
        return Err(RbmError::ShapeMismatch {
            name: name.to_string(),
            expected: expected.to_vec(),
            actual: value.dims().to_vec(),
        });
    }
    Ok(())
}
