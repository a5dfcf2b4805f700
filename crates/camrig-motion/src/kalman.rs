//! 单轴卡尔曼状态估计
//!
//! 状态向量 `[position, velocity, acceleration]ᵀ`，常加速度模型：
//!
//! ```text
//! | 1  dt  dt²/2 |
//! | 0  1   dt    |
//! | 0  0   1     |
//! ```
//!
//! 观测只含位置，或在提供速度提示时为位置 + 速度（速度通道噪声更大）。
//! 协方差使用 Joseph 形式更新并在每步后对称化。
//!
//! # 状态机
//!
//! `Uninitialized → Tracking`：首次 `update` 直接以测量值播种（速度、加速度为 0），
//! `reset()` 回到 `Uninitialized`，保留噪声参数。

use crate::EstimatorError;
use camrig_tools::KalmanSettings;
use nalgebra::{SMatrix, SVector};
use tracing::warn;

type Vector3 = SVector<f64, 3>;
type Vector2 = SVector<f64, 2>;
type Matrix3 = SMatrix<f64, 3, 3>;
type Matrix2 = SMatrix<f64, 2, 2>;
/// 单通道观测矩阵
type Matrix1x3 = SMatrix<f64, 1, 3>;
/// 位置 + 速度观测矩阵
type Matrix2x3 = SMatrix<f64, 2, 3>;

/// 估计值快照（物理单位）
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KalmanState {
    pub position: f64,
    pub velocity: f64,
    pub acceleration: f64,
}

impl KalmanState {
    fn from_vector(x: &Vector3) -> Self {
        Self {
            position: x[0],
            velocity: x[1],
            acceleration: x[2],
        }
    }
}

#[derive(Debug, Clone)]
pub struct KalmanEstimator {
    x: Vector3,
    p: Matrix3,
    f: Matrix3,
    q: Matrix3,
    measurement_noise: f64,
    velocity_noise_factor: f64,
    initial_covariance: f64,
    dt: f64,
    initialized: bool,
}

impl Default for KalmanEstimator {
    fn default() -> Self {
        Self::new(&KalmanSettings::default())
    }
}

impl KalmanEstimator {
    pub fn new(settings: &KalmanSettings) -> Self {
        let q = Matrix3::from_diagonal(&Vector3::new(
            settings.process_noise_position,
            settings.process_noise_velocity,
            settings.process_noise_acceleration,
        ));
        Self {
            x: Vector3::zeros(),
            p: Matrix3::identity() * settings.initial_covariance,
            f: transition_matrix(settings.update_rate),
            q,
            measurement_noise: settings.measurement_noise,
            velocity_noise_factor: settings.velocity_noise_factor,
            initial_covariance: settings.initial_covariance,
            dt: settings.update_rate,
            initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn state(&self) -> KalmanState {
        KalmanState::from_vector(&self.x)
    }

    /// 位置方差 P[0,0]，用于诊断
    pub fn position_variance(&self) -> f64 {
        self.p[(0, 0)]
    }

    pub fn covariance(&self) -> &SMatrix<f64, 3, 3> {
        &self.p
    }

    pub fn time_step(&self) -> f64 {
        self.dt
    }

    /// 设置下一次 `predict` 使用的时间步长（秒）
    ///
    /// 非正或非有限的步长被忽略。
    pub fn set_time_step(&mut self, dt: f64) {
        if !(dt.is_finite() && dt > 0.0) {
            warn!("Ignoring invalid estimator time step {}", dt);
            return;
        }
        self.dt = dt;
        self.f = transition_matrix(dt);
    }

    /// 按当前步长外推一步，不引入新测量
    ///
    /// 未初始化时原样返回零状态。
    pub fn predict(&mut self) -> Result<KalmanState, EstimatorError> {
        if !self.initialized {
            return Ok(self.state());
        }
        let x = self.f * self.x;
        let p = self.f * self.p * self.f.transpose() + self.q;
        self.commit(x, p)?;
        Ok(self.state())
    }

    /// 仅位置观测
    pub fn update(&mut self, position: f64) -> Result<KalmanState, EstimatorError> {
        self.update_with_velocity(position, None)
    }

    /// 位置观测，可附带速度提示
    pub fn update_with_velocity(
        &mut self,
        position: f64,
        velocity: Option<f64>,
    ) -> Result<KalmanState, EstimatorError> {
        if !position.is_finite() || velocity.is_some_and(|v| !v.is_finite()) {
            return Err(self.fail());
        }

        if !self.initialized {
            self.x = Vector3::new(position, 0.0, 0.0);
            self.initialized = true;
            return Ok(self.state());
        }

        match velocity {
            Some(velocity) => self.correct_position_velocity(position, velocity)?,
            None => self.correct_position(position)?,
        }
        Ok(self.state())
    }

    /// 回到未初始化状态，恢复初始协方差
    pub fn reset(&mut self) {
        self.x = Vector3::zeros();
        self.p = Matrix3::identity() * self.initial_covariance;
        self.initialized = false;
    }

    fn correct_position(&mut self, z: f64) -> Result<(), EstimatorError> {
        let h = Matrix1x3::new(1.0, 0.0, 0.0);
        let s = (h * self.p * h.transpose())[(0, 0)] + self.measurement_noise;
        if !s.is_finite() || s.abs() <= f64::EPSILON {
            return Err(self.fail());
        }

        let k: Vector3 = self.p * h.transpose() / s;
        let innovation = z - (h * self.x)[(0, 0)];
        let x = self.x + k * innovation;

        let i_kh = Matrix3::identity() - k * h;
        let p = i_kh * self.p * i_kh.transpose() + k * k.transpose() * self.measurement_noise;
        self.commit(x, p)
    }

    fn correct_position_velocity(&mut self, z_position: f64, z_velocity: f64) -> Result<(), EstimatorError> {
        let h = Matrix2x3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0);
        let r = Matrix2::new(
            self.measurement_noise,
            0.0,
            0.0,
            self.measurement_noise * self.velocity_noise_factor,
        );
        let s = h * self.p * h.transpose() + r;
        let Some(s_inv) = s.try_inverse() else {
            return Err(self.fail());
        };

        let k = self.p * h.transpose() * s_inv;
        let innovation = Vector2::new(z_position, z_velocity) - h * self.x;
        let x = self.x + k * innovation;

        let i_kh = Matrix3::identity() - k * h;
        let p = i_kh * self.p * i_kh.transpose() + k * r * k.transpose();
        self.commit(x, p)
    }

    /// 对称化后检查数值健康，失败则重置
    fn commit(&mut self, x: Vector3, p: Matrix3) -> Result<(), EstimatorError> {
        let p = (p + p.transpose()) * 0.5;
        let healthy = x.iter().all(|v| v.is_finite())
            && p.iter().all(|v| v.is_finite())
            && (0..3).all(|i| p[(i, i)] >= 0.0);
        if !healthy {
            return Err(self.fail());
        }
        self.x = x;
        self.p = p;
        Ok(())
    }

    fn fail(&mut self) -> EstimatorError {
        warn!("Kalman estimator became numerically unstable, resetting");
        self.reset();
        EstimatorError::NumericalInstability
    }
}

#[rustfmt::skip]
fn transition_matrix(dt: f64) -> Matrix3 {
    Matrix3::new(
        1.0, dt,  0.5 * dt * dt,
        0.0, 1.0, dt,
        0.0, 0.0, 1.0,
    )
}
