use thiserror::Error;

pub type Result<T> = std::result::Result<T, RbmError>;

#[derive(Error, Debug)]
pub enum RbmError {
    // 形状が合わない (設定ミス or データ破損)
    #[error("shape mismatch for {name}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("user index {index} out of range (n_users = {n_users})")]
    UserOutOfRange { index: u32, n_users: usize },

    #[error("item index {index} out of range (n_visible = {n_visible})")]
    ItemOutOfRange { index: u32, n_visible: usize },

    #[error("invalid rating {value}: expected 1..={num_rat} or empty")]
    InvalidRating { value: i64, num_rat: usize },

    #[error("invalid config: {0}")]
    Config(String),

    #[error("failed to parse {path} line {line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
