//! epoch / バッチのループ。Gibbs ステップ数の切り替え、学習率の annealing、
//! 検証 RMSE とチェックポイントの保存もここで行う

use std::path::PathBuf;

use candle_core::Device;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::cd::CdEngine;
use crate::checkpoint::{save_checkpoint, TrainingSummary};
use crate::config::{RbmConfig, TrainingConfig};
use crate::datasets::{BatchEncoder, DataLoader, EvalSet, RatingDataset};
use crate::error::Result;
use crate::evaluator::{Evaluation, Evaluator};
use crate::optimizer::Momentum;
use crate::params::ParameterStore;
use crate::sampler::Sampler;

/// `k_increase_epoch` 以降は `k_increased` ステップ
pub fn gibbs_steps_for_epoch(config: &TrainingConfig, epoch: usize) -> usize {
    if epoch >= config.k_increase_epoch {
        config.k_increased
    } else {
        config.k
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EpochStats {
    pub batches: usize,
    /// バッチごとの train RMSE の平均
    pub train_rmse: f32,
    pub gibbs_steps: usize,
}

pub struct Trainer {
    config: TrainingConfig,
    params: ParameterStore,
    sampler: Sampler,
    cd: CdEngine,
    optimizer: Momentum,
    evaluator: Evaluator,
    encoder: BatchEncoder,
    shuffle_rng: StdRng,
}

impl Trainer {
    pub fn new(config: &RbmConfig, params: ParameterStore, device: &Device) -> Self {
        let training = config.training.clone();
        Self {
            sampler: Sampler::new(training.seed),
            cd: CdEngine::new(training.k),
            optimizer: Momentum::new(&training),
            evaluator: Evaluator::new(training.mean_field_prediction),
            encoder: BatchEncoder::new(&config.model, device),
            shuffle_rng: StdRng::seed_from_u64(training.seed.wrapping_add(1)),
            params,
            config: training,
        }
    }

    pub fn params(&self) -> &ParameterStore {
        &self.params
    }

    pub fn gibbs_steps(&self) -> usize {
        self.cd.k()
    }

    pub fn optimizer(&self) -> &Momentum {
        &self.optimizer
    }

    pub fn train_epoch(&mut self, epoch: usize, train: &RatingDataset) -> Result<EpochStats> {
        self.optimizer.anneal(epoch);
        let k = gibbs_steps_for_epoch(&self.config, epoch);
        if k != self.cd.k() {
            tracing::info!(epoch, from = self.cd.k(), to = k, "Changing Gibbs steps");
            self.cd.set_k(k);
        }

        // epoch ごとに作り直してシャッフルする
        let loader = DataLoader::new(
            train,
            self.encoder.clone(),
            self.config.batch_size,
            &mut self.shuffle_rng,
        );
        let pb = ProgressBar::new(loader.num_batches() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );

        let mut batches = 0usize;
        let mut rmse_total = 0f64;
        let mut gibbs_steps = 0usize;
        for batch in loader {
            let batch = batch?;
            let grads = self.cd.compute(&self.params, &mut self.sampler, &batch)?;
            self.optimizer.step(&mut self.params, &grads)?;
            gibbs_steps = grads.gibbs_steps;

            let train_rmse = self.evaluator.train_rmse(&self.params, &mut self.sampler, &batch)?;
            rmse_total += train_rmse as f64;
            batches += 1;
            pb.set_message(format!("train_rmse={train_rmse:.4}"));
            pb.inc(1);
        }
        pb.finish_and_clear();

        Ok(EpochStats {
            batches,
            train_rmse: (rmse_total / batches.max(1) as f64) as f32,
            gibbs_steps,
        })
    }

    pub fn evaluate(&mut self, eval: &EvalSet) -> Result<Evaluation> {
        self.evaluator.evaluate(
            &self.params,
            &mut self.sampler,
            &self.encoder,
            eval,
            self.config.batch_size,
        )
    }

    /// epoch `start_epoch..epochs` をまわす。`checkpoint_every` epoch ごとと最後にチェックポイントを保存する。
    ///
    /// 途中から再開するときは、それまでの epoch の annealing をやり直してから始める。
    /// モーメンタムの速度はチェックポイントに含まれないので 0 から
    pub fn train(
        &mut self,
        train: &RatingDataset,
        probe: Option<&EvalSet>,
        start_epoch: usize,
        epochs: usize,
    ) -> Result<TrainingSummary> {
        let mut summary = TrainingSummary::default();
        let checkpoint_dir: PathBuf = self.config.checkpoint_dir.clone();

        for epoch in 0..start_epoch.min(epochs) {
            self.optimizer.anneal(epoch);
        }
        if start_epoch > 0 {
            tracing::info!(start_epoch, "Resuming training");
        }

        for epoch in start_epoch..epochs {
            tracing::info!("Epoch {}/{}", epoch + 1, epochs);
            let stats = self.train_epoch(epoch, train)?;

            let val_rmse = match probe {
                Some(probe) => self.evaluate(probe)?.rmse,
                None => None,
            };
            let lr = self.optimizer.learning_rates();
            tracing::info!(
                epoch = epoch + 1,
                batches = stats.batches,
                train_rmse = stats.train_rmse,
                val_rmse = ?val_rmse,
                gibbs_steps = stats.gibbs_steps,
                lr_weights = lr.weights,
                "Epoch finished"
            );

            summary.epochs += 1;
            summary.train_rmse.push(stats.train_rmse);
            summary.val_rmse.push(val_rmse);
            summary.final_gibbs_steps = stats.gibbs_steps;

            let every = self.config.checkpoint_every;
            if every > 0 && (epoch + 1) % every == 0 {
                save_checkpoint(&self.params, &checkpoint_dir, Some(epoch))?;
            }
        }

        save_checkpoint(&self.params, &checkpoint_dir, None)?;
        summary.save(&checkpoint_dir.join("summary.json"))?;
        Ok(summary)
    }
}
