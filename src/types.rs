use serde::{Deserialize, Serialize};

use crate::error::{RbmError, Result};

/// CSV の1行。rating が空欄の行は予測対象 (正解なし)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    #[serde(rename = "user", alias = "userId")]
    pub user_id: u32,
    #[serde(rename = "item", alias = "movieId")]
    pub item_id: u32,
    pub rating: Option<i64>,
}

/// CSV の rating 列の書き方。どちらでも空欄は未評価
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatingEncoding {
    /// 星の数 1..=num_rat
    #[default]
    Stars,
    /// 星 - 1 の 0..num_rat。-1 は未評価
    Shifted,
}

impl RatingEncoding {
    pub fn decode(self, raw: Option<i64>, num_rat: usize) -> Result<Rating> {
        match (self, raw) {
            (_, None) => Ok(Rating::Missing),
            (RatingEncoding::Stars, Some(stars)) => Rating::from_stars(stars, num_rat),
            (RatingEncoding::Shifted, Some(value)) => Rating::from_shifted(value, num_rat),
        }
    }
}

/// 1つのアイテムに対する評価。`Missing` は one-hot で全部 0 の列になる
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rating {
    Missing,
    /// 0始まりの評価段階 (星 - 1)
    Level(u8),
}

impl Rating {
    /// 星の数 (1..=num_rat) から
    pub fn from_stars(stars: i64, num_rat: usize) -> Result<Self> {
        match stars {
            s if s >= 1 && (s as usize) <= num_rat => Ok(Rating::Level((s - 1) as u8)),
            s => Err(RbmError::InvalidRating { value: s, num_rat }),
        }
    }

    /// 1引いた値 (0..num_rat) から。-1 は未評価の番兵
    pub fn from_shifted(value: i64, num_rat: usize) -> Result<Self> {
        match value {
            -1 => Ok(Rating::Missing),
            v if v >= 0 && (v as usize) < num_rat => Ok(Rating::Level(v as u8)),
            v => Err(RbmError::InvalidRating {
                value: v + 1,
                num_rat,
            }),
        }
    }

    pub fn level(self) -> Option<usize> {
        match self {
            Rating::Missing => None,
            Rating::Level(l) => Some(l as usize),
        }
    }

    pub fn stars(self) -> Option<f32> {
        self.level().map(|l| (l + 1) as f32)
    }
}

/// 1ユーザー分の疎な評価ベクトル (indices + values)
#[derive(Debug, Clone, PartialEq)]
pub struct UserRatings {
    pub user: u32,
    pub items: Vec<u32>,
    pub ratings: Vec<Rating>,
}

impl UserRatings {
    pub fn new(user: u32) -> Self {
        Self {
            user,
            items: Vec::new(),
            ratings: Vec::new(),
        }
    }

    pub fn push(&mut self, item: u32, rating: Rating) {
        self.items.push(item);
        self.ratings.push(rating);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

}
