/// 予測と正解の二乗誤差を足し込んで RMSE を出す
#[derive(Debug, Clone, Copy, Default)]
pub struct RmseAccumulator {
    sum_sq: f64,
    count: usize,
}

impl RmseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, prediction: f32, truth: f32) {
        let diff = prediction as f64 - truth as f64;
        self.sum_sq += diff * diff;
        self.count += 1;
    }

    /// 別バッチで計算済みの二乗誤差の和と件数をまとめて足す
    pub fn add_sum(&mut self, sum_sq: f64, count: usize) {
        self.sum_sq += sum_sq;
        self.count += count;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// 件数 0 のときは分母を 1 にするので 0 を返す
    pub fn rmse(&self) -> f32 {
        (self.sum_sq / self.count.max(1) as f64).sqrt() as f32
    }
}
