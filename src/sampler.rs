use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::Result;

/// Propagator の出力からサンプルを作る。
/// `binary` なら一様乱数と比べて {0, 1} にし、そうでなければ確率をそのまま返す (mean-field)
pub struct Sampler {
    rng: StdRng,
}

impl Sampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn sample_hidden(&mut self, probs: &Tensor, binary: bool) -> Result<Tensor> {
        if binary {
            self.bernoulli(probs)
        } else {
            Ok(probs.clone())
        }
    }

    pub fn sample_visible(&mut self, probs: &Tensor, binary: bool) -> Result<Tensor> {
        if binary {
            self.bernoulli(probs)
        } else {
            Ok(probs.clone())
        }
    }

    fn bernoulli(&mut self, probs: &Tensor) -> Result<Tensor> {
        let uniform: Vec<f32> = (0..probs.elem_count())
            .map(|_| self.rng.random::<f32>())
            .collect();
        let uniform = Tensor::from_vec(uniform, probs.dims(), probs.device())?;
        Ok(probs.gt(&uniform)?.to_dtype(probs.dtype())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_binary_sample_is_zero_or_one() -> Result<()> {
        let probs = Tensor::new(&[[0.0f32, 0.3, 0.7, 1.0], [0.5, 0.5, 0.5, 0.5]], &Device::Cpu)?;
        let mut sampler = Sampler::new(7);

        for _ in 0..20 {
            let sample = sampler.sample_hidden(&probs, true)?.to_vec2::<f32>()?;
            assert_eq!(sample[0][0], 0.0);
            assert_eq!(sample[0][3], 1.0);
            assert!(sample.iter().flatten().all(|&x| x == 0.0 || x == 1.0));
        }
        Ok(())
    }

    #[test]
    fn test_mean_field_returns_probabilities() -> Result<()> {
        let probs = Tensor::new(&[0.1f32, 0.9, 0.25], &Device::Cpu)?;
        let mut sampler = Sampler::new(0);
        let out = sampler.sample_visible(&probs, false)?;
        assert_eq!(out.to_vec1::<f32>()?, vec![0.1, 0.9, 0.25]);
        Ok(())
    }

    #[test]
    fn test_bernoulli_frequency_follows_probability() -> Result<()> {
        let probs = Tensor::from_vec(vec![0.3f32; 10_000], 10_000, &Device::Cpu)?;
        let mut sampler = Sampler::new(123);
        let mean = sampler
            .sample_hidden(&probs, true)?
            .mean_all()?
            .to_scalar::<f32>()?;
        assert!((mean - 0.3).abs() < 0.03, "mean = {mean}");
        Ok(())
    }

    #[test]
    fn test_same_seed_same_samples() -> Result<()> {
        let probs = Tensor::from_vec(vec![0.5f32; 64], (8, 8), &Device::Cpu)?;
        let a = Sampler::new(99).sample_hidden(&probs, true)?.to_vec2::<f32>()?;
        let b = Sampler::new(99).sample_hidden(&probs, true)?.to_vec2::<f32>()?;
        assert_eq!(a, b);
        Ok(())
    }
}
