use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::params::ParameterStore;

/// `epoch` があれば途中経過 (`rbm_{epoch}`)、なければ最終結果 (`rbm`)
pub fn checkpoint_path(dir: &Path, epoch: Option<usize>) -> PathBuf {
    match epoch {
        Some(epoch) => dir.join(format!("rbm_{epoch}.safetensors")),
        None => dir.join("rbm.safetensors"),
    }
}

pub fn save_checkpoint(params: &ParameterStore, dir: &Path, epoch: Option<usize>) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = checkpoint_path(dir, epoch);
    params.save(&path)?;
    tracing::info!(path = %path.display(), "Saved checkpoint");
    Ok(path)
}

pub fn load_checkpoint(params: &mut ParameterStore, path: &Path) -> Result<()> {
    params.load(path)?;
    tracing::info!(path = %path.display(), "Loaded checkpoint");
    Ok(())
}

/// 1行に1つ、データセットの順で予測値を書く
pub fn write_submission(path: &Path, predictions: &[f32]) -> Result<()> {
    let mut writer = BufWriter::new(std::fs::File::create(path)?);
    for prediction in predictions {
        writeln!(writer, "{prediction}")?;
    }
    writer.flush()?;
    tracing::info!(path = %path.display(), predictions = predictions.len(), "Wrote submission");
    Ok(())
}

/// 学習の記録。チェックポイントと同じディレクトリに JSON で置く
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub epochs: usize,
    pub train_rmse: Vec<f32>,
    pub val_rmse: Vec<Option<f32>>,
    pub final_gibbs_steps: usize,
}

impl TrainingSummary {
    pub fn save(&self, path: &Path) -> Result<()> {
        let json_string = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json_string)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json_string = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(json_string.as_str())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use candle_core::{Device, Tensor};

    fn model() -> ModelConfig {
        ModelConfig {
            n_visible: 4,
            n_hidden: 3,
            num_rat: 5,
            n_users: 2,
            weight_std: 0.3,
        }
    }

    #[test]
    fn test_checkpoint_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let prior: Vec<f32> = (0..20).map(|x| x as f32 * 0.125).collect();
        let params = ParameterStore::new(&model(), &prior, &Device::Cpu)?;
        let delta = Tensor::new(&[[0.5f32, -1.25, 3.0]], &Device::Cpu)?;
        params.scatter_add_hidden_bias(&[1], &delta)?;

        let path = save_checkpoint(&params, dir.path(), Some(4))?;
        assert_eq!(path, dir.path().join("rbm_4.safetensors"));

        let mut restored = ParameterStore::zeros(&model(), &Device::Cpu)?;
        load_checkpoint(&mut restored, &path)?;
        assert_eq!(restored.weights().to_vec3::<f32>()?, params.weights().to_vec3::<f32>()?);
        assert_eq!(restored.hidden_bias().to_vec2::<f32>()?, params.hidden_bias().to_vec2::<f32>()?);
        assert_eq!(restored.visible_bias().to_vec2::<f32>()?, params.visible_bias().to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn test_load_rejects_other_shape() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let params = ParameterStore::zeros(&model(), &Device::Cpu)?;
        let path = save_checkpoint(&params, dir.path(), None)?;
        assert_eq!(path, dir.path().join("rbm.safetensors"));

        let other = ModelConfig {
            n_hidden: 7,
            ..model()
        };
        let mut wrong = ParameterStore::zeros(&other, &Device::Cpu)?;
        assert!(load_checkpoint(&mut wrong, &path).is_err());
        Ok(())
    }

    #[test]
    fn test_write_submission() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("rbm.txt");
        write_submission(&path, &[3.5, 1.25, 4.0])?;
        let text = std::fs::read_to_string(&path)?;
        let values: Vec<f32> = text.lines().map(|l| l.parse().unwrap()).collect();
        assert_eq!(values, vec![3.5, 1.25, 4.0]);
        Ok(())
    }

    #[test]
    fn test_summary_save_and_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("summary.json");
        let summary = TrainingSummary {
            epochs: 2,
            train_rmse: vec![1.1, 0.95],
            val_rmse: vec![Some(1.0), None],
            final_gibbs_steps: 1,
        };
        summary.save(&path)?;
        assert_eq!(TrainingSummary::load(&path)?, summary);
        Ok(())
    }
}
