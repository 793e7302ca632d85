use candle_core::Tensor;

use crate::datasets::{rating_mask, BatchEncoder, EvalSet, RatingBatch};
use crate::error::{RbmError, Result};
use crate::loss::squared_error_sum;
use crate::metrics::RmseAccumulator;
use crate::params::ParameterStore;
use crate::propagator::{backward, forward};
use crate::sampler::Sampler;
use crate::types::UserRatings;

/// 予測結果。正解つきのクエリがあれば RMSE も
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// クエリの (user, item) ごとの予測。データセットの並び順
    pub predictions: Vec<f32>,
    pub rmse: Option<f32>,
}

pub struct Evaluator {
    mean_field_hidden: bool,
}

impl Evaluator {
    /// `mean_field_hidden` が false なら hidden は確率的にサンプリングする
    pub fn new(mean_field_hidden: bool) -> Self {
        Self { mean_field_hidden }
    }

    /// forward → backward を1回通して、評価段階の期待値 (1..=num_rat) を返す。(batch, n_visible)
    ///
    /// `mask_missing` なら入力で未評価のアイテムは 0 にする
    pub fn forward_predict(
        &self,
        params: &ParameterStore,
        sampler: &mut Sampler,
        visible: &Tensor,
        users: &Tensor,
        mask_missing: bool,
    ) -> Result<Tensor> {
        let hidden = sampler.sample_hidden(&forward(params, visible, users)?, !self.mean_field_hidden)?;
        let mut recon = sampler.sample_visible(&backward(params, &hidden)?, false)?;
        if mask_missing {
            recon = (recon * rating_mask(visible)?)?;
        }
        expected_rating(&recon)
    }

    /// バッチ自身の評価に対する RMSE。分母は評価済みのセル数 (最低 1)
    pub fn train_rmse(
        &self,
        params: &ParameterStore,
        sampler: &mut Sampler,
        batch: &RatingBatch,
    ) -> Result<f32> {
        let predictions = self.forward_predict(params, sampler, &batch.visible, &batch.users, true)?;
        // one-hot なので期待値はそのまま星の数、未評価は 0
        let truth = expected_rating(&batch.visible)?;
        let sum_sq = squared_error_sum(&truth, &predictions)?.to_scalar::<f32>()?;
        let rated = batch.visible.sum_all()?.to_scalar::<f32>()? as usize;

        let mut acc = RmseAccumulator::new();
        acc.add_sum(sum_sq as f64, rated);
        Ok(acc.rmse())
    }

    /// `eval.inputs` を入力にして `eval.targets` の各アイテムを予測する
    pub fn evaluate(
        &self,
        params: &ParameterStore,
        sampler: &mut Sampler,
        encoder: &BatchEncoder,
        eval: &EvalSet,
        batch_size: usize,
    ) -> Result<Evaluation> {
        let mut predictions = Vec::with_capacity(eval.num_queries());
        let mut acc = RmseAccumulator::new();
        let batch_size = batch_size.max(1);

        for (inputs, targets) in eval.inputs.chunks(batch_size).zip(eval.targets.chunks(batch_size)) {
            let rows: Vec<&UserRatings> = inputs.iter().map(|row| row.as_ref()).collect();
            let batch = encoder.encode(&rows)?;
            let preds = self
                .forward_predict(params, sampler, &batch.visible, &batch.users, false)?
                .to_vec2::<f32>()?;

            for (row, target) in preds.iter().zip(targets.iter()) {
                for (&item, rating) in target.items.iter().zip(target.ratings.iter()) {
                    let pred = *row.get(item as usize).ok_or(RbmError::ItemOutOfRange {
                        index: item,
                        n_visible: row.len(),
                    })?;
                    predictions.push(pred);
                    if let Some(truth) = rating.stars() {
                        acc.add(pred, truth);
                    }
                }
            }
        }

        let rmse = (acc.count() > 0).then(|| acc.rmse());
        Ok(Evaluation { predictions, rmse })
    }
}

/// (batch, num_rat, n_visible) の確率を [1, 2, .., num_rat] で重みづけして和をとる
pub fn expected_rating(probs: &Tensor) -> Result<Tensor> {
    let (_, num_rat, _) = probs.dims3()?;
    let scale = Tensor::arange(1f32, (num_rat + 1) as f32, probs.device())?.reshape((1, num_rat, 1))?;
    Ok(probs.broadcast_mul(&scale)?.sum(1)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::datasets::RatingDataset;
    use crate::types::Rating;
    use candle_core::Device;

    fn model() -> ModelConfig {
        ModelConfig {
            n_visible: 5,
            n_hidden: 3,
            num_rat: 5,
            n_users: 4,
            weight_std: 0.1,
        }
    }

    #[test]
    fn test_zero_parameters_predict_three() -> Result<()> {
        let device = Device::Cpu;
        let params = ParameterStore::zeros(&model(), &device)?;
        let encoder = BatchEncoder::new(&model(), &device);
        let mut row = UserRatings::new(0);
        row.push(1, Rating::Level(2));
        let batch = encoder.encode(&[&row])?;

        let evaluator = Evaluator::new(false);
        let mut sampler = Sampler::new(0);
        let preds = evaluator
            .forward_predict(&params, &mut sampler, &batch.visible, &batch.users, false)?
            .to_vec2::<f32>()?;
        assert!(preds[0].iter().all(|&p| (p - 3.0).abs() < 1e-5));

        let masked = evaluator
            .forward_predict(&params, &mut sampler, &batch.visible, &batch.users, true)?
            .to_vec2::<f32>()?;
        assert!((masked[0][1] - 3.0).abs() < 1e-5);
        for item in [0usize, 2, 3, 4] {
            assert_eq!(masked[0][item], 0.0);
        }
        Ok(())
    }

    #[test]
    fn test_expected_rating_of_one_hot_is_stars() -> Result<()> {
        let device = Device::Cpu;
        let encoder = BatchEncoder::new(&model(), &device);
        let mut row = UserRatings::new(0);
        row.push(0, Rating::Level(4));
        row.push(3, Rating::Level(0));
        let batch = encoder.encode(&[&row])?;
        let stars = expected_rating(&batch.visible)?.to_vec2::<f32>()?;
        assert_eq!(stars, vec![vec![5.0, 0.0, 0.0, 1.0, 0.0]]);
        Ok(())
    }

    #[test]
    fn test_train_rmse_with_uniform_model() -> Result<()> {
        let device = Device::Cpu;
        let params = ParameterStore::zeros(&model(), &device)?;
        let encoder = BatchEncoder::new(&model(), &device);
        let mut a = UserRatings::new(1);
        a.push(0, Rating::Level(4));
        a.push(2, Rating::Level(0));
        let empty = UserRatings::new(2);
        let batch = encoder.encode(&[&a, &empty])?;

        // 予測はどこも 3。誤差は 2 と -2
        let rmse = Evaluator::new(true).train_rmse(&params, &mut Sampler::new(0), &batch)?;
        assert!((rmse - 2.0).abs() < 1e-5);

        // 評価が1つもなければ分母は 1 にクランプされる
        let only_empty = encoder.encode(&[&empty])?;
        let rmse = Evaluator::new(true).train_rmse(&params, &mut Sampler::new(0), &only_empty)?;
        assert_eq!(rmse, 0.0);
        Ok(())
    }

    #[test]
    fn test_evaluate_gathers_probe_pairs_in_order() -> Result<()> {
        let device = Device::Cpu;
        let params = ParameterStore::zeros(&model(), &device)?;
        let encoder = BatchEncoder::new(&model(), &device);

        let mut train_row = UserRatings::new(0);
        train_row.push(0, Rating::Level(1));
        let train = RatingDataset { rows: vec![train_row] };

        let mut p0 = UserRatings::new(0);
        p0.push(4, Rating::Level(2));
        p0.push(1, Rating::Level(4));
        let mut p1 = UserRatings::new(3);
        p1.push(2, Rating::Missing);
        let probe = RatingDataset { rows: vec![p0, p1] };

        let eval = EvalSet::pair(&train, &probe);
        let result = Evaluator::new(true).evaluate(&params, &mut Sampler::new(0), &encoder, &eval, 1)?;

        assert_eq!(result.predictions.len(), 3);
        assert!(result.predictions.iter().all(|&p| (p - 3.0).abs() < 1e-5));
        // 正解は 3 と 5 → sqrt((0 + 4) / 2)
        let rmse = result.rmse.unwrap();
        assert!((rmse - 2f32.sqrt()).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_evaluate_without_truth_has_no_rmse() -> Result<()> {
        let device = Device::Cpu;
        let params = ParameterStore::zeros(&model(), &device)?;
        let encoder = BatchEncoder::new(&model(), &device);
        let mut q = UserRatings::new(1);
        q.push(0, Rating::Missing);
        let queries = RatingDataset { rows: vec![q] };
        let train = RatingDataset::default();
        let eval = EvalSet::pair(&train, &queries);

        let result = Evaluator::new(false).evaluate(&params, &mut Sampler::new(0), &encoder, &eval, 8)?;
        assert_eq!(result.predictions.len(), 1);
        assert!(result.rmse.is_none());
        Ok(())
    }
}
