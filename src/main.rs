use std::path::{Path, PathBuf};

use anyhow::Context;
use candle_core::Device;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use candle_rbm::checkpoint::{load_checkpoint, write_submission};
use candle_rbm::config::RbmConfig;
use candle_rbm::datasets::{load_item_frequencies, EvalSet, RatingDataset};
use candle_rbm::params::ParameterStore;
use candle_rbm::trainer::Trainer;

/// candle-rbm: RBM による協調フィルタリング (評価値予測)
#[derive(Parser)]
#[command(name = "candle-rbm", version, about)]
struct Args {
    /// TOML の設定ファイル。なければデフォルト値を使う
    #[arg(long, default_value = "rbm.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 学習してチェックポイントを保存する
    Train {
        #[arg(long)]
        epochs: Option<usize>,
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
        /// 保存済みのチェックポイントから続ける
        #[arg(long)]
        resume: Option<PathBuf>,
        /// 再開する epoch (0始まり)。`rbm_{N}` から続けるなら N + 1
        #[arg(long, default_value_t = 0, requires = "resume")]
        start_epoch: usize,
        /// 学習後に qual セットの予測を書き出す
        #[arg(long)]
        submit: bool,
    },
    /// チェックポイントを読み込んで予測を書き出す
    Predict {
        #[arg(long)]
        checkpoint: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
        /// qual ではなく probe セットを予測して RMSE も出す
        #[arg(long)]
        probe: bool,
    },
}

fn load_config(path: &Path) -> anyhow::Result<RbmConfig> {
    if path.exists() {
        RbmConfig::load(path).with_context(|| format!("failed to load config {}", path.display()))
    } else {
        tracing::warn!(path = %path.display(), "Config not found, using defaults");
        Ok(RbmConfig::default())
    }
}

#[allow(clippy::too_many_arguments)]
fn run_train(
    mut config: RbmConfig,
    epochs: Option<usize>,
    checkpoint_dir: Option<PathBuf>,
    seed: Option<u64>,
    resume: Option<PathBuf>,
    start_epoch: usize,
    submit: bool,
    device: &Device,
) -> anyhow::Result<()> {
    // CLI > TOML > デフォルト
    if let Some(epochs) = epochs {
        config.training.epochs = epochs;
    }
    if let Some(dir) = checkpoint_dir {
        config.training.checkpoint_dir = dir;
    }
    if let Some(seed) = seed {
        config.training.seed = seed;
    }
    config.validate()?;
    let encoding = config.data.rating_encoding;

    println!("Loading data from {}", config.data.train_path.display());
    let train = RatingDataset::load(&config.data.train_path, &config.model, encoding)
        .context("学習データが読めませんでした")?;
    let probe = RatingDataset::load(&config.data.probe_path, &config.model, encoding)
        .context("probeデータが読めませんでした")?;
    let probe = EvalSet::pair(&train, &probe);
    println!(
        "Users: {}, Ratings: {}, Probe queries: {}",
        train.len(),
        train.num_ratings(),
        probe.num_queries()
    );

    let prior = load_item_frequencies(
        &config.data.item_frequencies_path,
        config.model.n_visible,
        config.model.num_rat,
    )
    .context("アイテム頻度ファイルが読めませんでした")?;
    let mut params = ParameterStore::new(&config.model, &prior, device)?;
    if let Some(path) = resume {
        load_checkpoint(&mut params, &path)?;
    }

    println!("Start training...");
    let mut trainer = Trainer::new(&config, params, device);
    let summary = trainer.train(&train, Some(&probe), start_epoch, config.training.epochs)?;
    if let Some(Some(rmse)) = summary.val_rmse.last() {
        println!("Final probe RMSE: {rmse:.4}");
    }

    if submit {
        let qual_path = config
            .data
            .qual_path
            .as_ref()
            .context("--submit には data.qual_path の設定が必要です")?;
        let qual = RatingDataset::load(qual_path, &config.model, encoding)?;
        let evaluation = trainer.evaluate(&EvalSet::pair(&train, &qual))?;
        write_submission(&config.data.submission_path, &evaluation.predictions)?;
    }
    Ok(())
}

fn run_predict(
    config: RbmConfig,
    checkpoint: PathBuf,
    output: Option<PathBuf>,
    probe: bool,
    device: &Device,
) -> anyhow::Result<()> {
    config.validate()?;
    let encoding = config.data.rating_encoding;
    let mut params = ParameterStore::zeros(&config.model, device)?;
    load_checkpoint(&mut params, &checkpoint)
        .with_context(|| format!("チェックポイント {} が読めませんでした", checkpoint.display()))?;

    let train = RatingDataset::load(&config.data.train_path, &config.model, encoding)?;
    let query_path = if probe {
        config.data.probe_path.clone()
    } else {
        config
            .data
            .qual_path
            .clone()
            .context("data.qual_path が設定されていません")?
    };
    let queries = RatingDataset::load(&query_path, &config.model, encoding)?;

    let mut trainer = Trainer::new(&config, params, device);
    let evaluation = trainer.evaluate(&EvalSet::pair(&train, &queries))?;
    if let Some(rmse) = evaluation.rmse {
        println!("RMSE: {rmse:.4}");
    }

    let output = output.unwrap_or_else(|| config.data.submission_path.clone());
    write_submission(&output, &evaluation.predictions)?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args.config)?;
    let device = Device::Cpu;

    match args.command {
        Command::Train {
            epochs,
            checkpoint_dir,
            seed,
            resume,
            start_epoch,
            submit,
        } => run_train(
            config,
            epochs,
            checkpoint_dir,
            seed,
            resume,
            start_epoch,
            submit,
            &device,
        ),
        Command::Predict {
            checkpoint,
            output,
            probe,
        } => run_predict(config, checkpoint, output, probe, &device),
    }
}
