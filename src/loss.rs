use candle_core::{Result, Tensor};

/// 二乗誤差の和。平均は呼び出し側で評価済みの件数で割る
pub fn squared_error_sum(labels: &Tensor, predictions: &Tensor) -> Result<Tensor> {
    (labels - predictions)?.sqr()?.sum_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_squared_error_sum() -> Result<()> {
        let labels = Tensor::new(&[1.0f32, 2.0, 3.0], &candle_core::Device::Cpu)?;
        let predictions = Tensor::new(&[1.0f32, 1.0, 2.0], &candle_core::Device::Cpu)?;

        let actual = squared_error_sum(&labels, &predictions)?;
        let actual = actual.to_scalar::<f32>()?;
        let expected = candle_nn::loss::mse(&labels, &predictions)?.to_scalar::<f32>()? * 3.0;

        assert!((actual - expected).abs() <= 0.0001);

        Ok(())
    }
}
