use rand::seq::SliceRandom;
use rand::Rng;
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use candle_core::{Device, Tensor};
use crate::config::ModelConfig;
use crate::error::{RbmError, Result};
use crate::types::{Interaction, Rating, RatingEncoding, UserRatings};

pub fn read_interactions(path: &Path) -> Result<Vec<Interaction>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut data = Vec::new();
    for row in reader.deserialize() {
        let row: Interaction = row?;
        data.push(row);
    }
    Ok(data)
}

/// ユーザーごとにまとめた評価データ。行の順番は CSV で最初に出てきた順
#[derive(Debug, Clone, Default)]
pub struct RatingDataset {
    pub rows: Vec<UserRatings>,
}

impl RatingDataset {
    pub fn from_interactions(
        interactions: &[Interaction],
        model: &ModelConfig,
        encoding: RatingEncoding,
    ) -> Result<Self> {
        let mut position: HashMap<u32, usize> = HashMap::new();
        let mut rows: Vec<UserRatings> = Vec::new();

        for action in interactions {
            if action.user_id as usize >= model.n_users {
                return Err(RbmError::UserOutOfRange {
                    index: action.user_id,
                    n_users: model.n_users,
                });
            }
            if action.item_id as usize >= model.n_visible {
                return Err(RbmError::ItemOutOfRange {
                    index: action.item_id,
                    n_visible: model.n_visible,
                });
            }
            let rating = encoding.decode(action.rating, model.num_rat)?;
            let idx = *position.entry(action.user_id).or_insert_with(|| {
                rows.push(UserRatings::new(action.user_id));
                rows.len() - 1
            });
            rows[idx].push(action.item_id, rating);
        }
        Ok(Self { rows })
    }

    pub fn load(path: &Path, model: &ModelConfig, encoding: RatingEncoding) -> Result<Self> {
        let interactions = read_interactions(path)?;
        let dataset = Self::from_interactions(&interactions, model, encoding)?;
        tracing::info!(
            path = %path.display(),
            interactions = interactions.len(),
            users = dataset.len(),
            "Loaded ratings"
        );
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn num_ratings(&self) -> usize {
        self.rows.iter().map(|r| r.len()).sum()
    }
}

/// one-hot にしたバッチ
pub struct RatingBatch {
    /// (batch, num_rat, n_visible)
    pub visible: Tensor,
    /// (batch,) u32
    pub users: Tensor,
    pub user_ids: Vec<u32>,
}

impl RatingBatch {
    pub fn len(&self) -> usize {
        self.user_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }

    /// 評価済みのセルだけ 1 になるマスク。形状は visible と同じ
    pub fn mask(&self) -> Result<Tensor> {
        rating_mask(&self.visible)
    }
}

/// 評価段階の軸で和をとり、0 の場所 (未評価) を 0、それ以外を 1 にする
pub fn rating_mask(visible: &Tensor) -> Result<Tensor> {
    let counts = visible.sum_keepdim(1)?;
    let mask = counts.gt(&counts.zeros_like()?)?.to_dtype(visible.dtype())?;
    Ok(mask.broadcast_as(visible.shape())?.contiguous()?)
}

#[derive(Debug, Clone)]
pub struct BatchEncoder {
    pub n_visible: usize,
    pub num_rat: usize,
    pub device: Device,
}

impl BatchEncoder {
    pub fn new(model: &ModelConfig, device: &Device) -> Self {
        Self {
            n_visible: model.n_visible,
            num_rat: model.num_rat,
            device: device.clone(),
        }
    }

    pub fn encode(&self, rows: &[&UserRatings]) -> Result<RatingBatch> {
        let batch = rows.len();
        let plane = self.num_rat * self.n_visible;
        let mut data = vec![0f32; batch * plane];
        let mut user_ids = Vec::with_capacity(batch);

        for (b, row) in rows.iter().enumerate() {
            user_ids.push(row.user);
            for (&item, &rating) in row.items.iter().zip(row.ratings.iter()) {
                if item as usize >= self.n_visible {
                    return Err(RbmError::ItemOutOfRange {
                        index: item,
                        n_visible: self.n_visible,
                    });
                }
                // Missing は全部 0 のまま
                if let Some(level) = rating.level() {
                    if level >= self.num_rat {
                        return Err(RbmError::InvalidRating {
                            value: level as i64 + 1,
                            num_rat: self.num_rat,
                        });
                    }
                    data[b * plane + level * self.n_visible + item as usize] = 1.0;
                }
            }
        }

        let visible = Tensor::from_vec(data, (batch, self.num_rat, self.n_visible), &self.device)?;
        let users = Tensor::from_vec(user_ids.clone(), batch, &self.device)?;
        Ok(RatingBatch {
            visible,
            users,
            user_ids,
        })
    }
}

pub struct DataLoader<'a> {
    dataset: &'a RatingDataset,
    encoder: BatchEncoder,
    batch_size: usize,
    current_index: usize,
    shuffled_indices: Vec<usize>,
}

impl<'a> DataLoader<'a> {
    /// epoch ごとに作り直すとシャッフルし直される
    pub fn new<R: Rng + ?Sized>(
        dataset: &'a RatingDataset,
        encoder: BatchEncoder,
        batch_size: usize,
        rng: &mut R,
    ) -> Self {
        let mut shuffled_indices = (0..dataset.len()).collect::<Vec<usize>>();
        shuffled_indices.shuffle(rng);

        DataLoader {
            dataset,
            encoder,
            batch_size: batch_size.max(1),
            current_index: 0usize,
            shuffled_indices,
        }
    }

    pub fn num_batches(&self) -> usize {
        self.shuffled_indices.len().div_ceil(self.batch_size)
    }
}

impl Iterator for DataLoader<'_> {
    type Item = Result<RatingBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        // 1. データを使い切ったら epoch の終わり
        if self.current_index >= self.shuffled_indices.len() {
            return None;
        }

        // 2. 最後のバッチは端数になる
        let remaining = self.shuffled_indices.len() - self.current_index;
        let size = self.batch_size.min(remaining);
        let end = self.current_index + size;

        let rows: Vec<&UserRatings> = self.shuffled_indices[self.current_index..end]
            .iter()
            .map(|&i| &self.dataset.rows[i])
            .collect();
        self.current_index += size;

        Some(self.encoder.encode(&rows))
    }
}

/// 予測する (user, item) と、その入力にする学習データの組。
/// どちらも元のデータセットを借りるだけで、コピーするのは学習データにいないユーザーの空行だけ
#[derive(Debug, Clone, Default)]
pub struct EvalSet<'a> {
    pub inputs: Vec<Cow<'a, UserRatings>>,
    pub targets: &'a [UserRatings],
}

impl<'a> EvalSet<'a> {
    /// `queries` の各ユーザーに `train` の評価を入力として対応づける。
    /// 学習データに出てこないユーザーは空の入力になる
    pub fn pair(train: &'a RatingDataset, queries: &'a RatingDataset) -> Self {
        let by_user: HashMap<u32, &'a UserRatings> =
            train.rows.iter().map(|row| (row.user, row)).collect();

        let inputs = queries
            .rows
            .iter()
            .map(|q| {
                by_user
                    .get(&q.user)
                    .map(|&row| Cow::Borrowed(row))
                    .unwrap_or_else(|| Cow::Owned(UserRatings::new(q.user)))
            })
            .collect();
        Self {
            inputs,
            targets: &queries.rows,
        }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn num_queries(&self) -> usize {
        self.targets.iter().map(|t| t.len()).sum()
    }
}

/// アイテムごとの評価頻度 (visible bias の初期値)。
/// 1行に1つの値なら全段階で共有、`num_rat` 個なら段階ごとの値。
/// 戻り値は (num_rat, n_visible) の row-major
pub fn load_item_frequencies(path: &Path, n_visible: usize, num_rat: usize) -> Result<Vec<f32>> {
    let text = std::fs::read_to_string(path)?;
    let path_str = path.display().to_string();
    let parse_error = |line: usize, message: String| RbmError::Parse {
        path: path_str.clone(),
        line,
        message,
    };

    let mut prior = vec![0f32; num_rat * n_visible];
    let mut item = 0usize;
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if item >= n_visible {
            return Err(parse_error(line_no + 1, format!("more than {n_visible} items")));
        }
        let values = line
            .split_whitespace()
            .map(|v| v.parse::<f32>())
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|e| parse_error(line_no + 1, e.to_string()))?;

        match values.len() {
            1 => {
                for level in 0..num_rat {
                    prior[level * n_visible + item] = values[0];
                }
            }
            n if n == num_rat => {
                for (level, v) in values.into_iter().enumerate() {
                    prior[level * n_visible + item] = v;
                }
            }
            n => {
                return Err(parse_error(
                    line_no + 1,
                    format!("expected 1 or {num_rat} values, got {n}"),
                ))
            }
        }
        item += 1;
    }

    if item != n_visible {
        return Err(RbmError::ShapeMismatch {
            name: "item frequencies".to_string(),
            expected: vec![n_visible],
            actual: vec![item],
        });
    }
    Ok(prior)
}
