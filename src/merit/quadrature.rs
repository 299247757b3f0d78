//! 高斯求积光瞳采样
//!
//! 光瞳上的旋转对称积分 ∫∫ f dA 经 u = ρ² 代换后为 [0, 1] 上的一维积分，
//! 用 Gauss-Legendre 节点映射得到环半径与环权重；臂在半光瞳（px >= 0）上均匀分布。

use std::f64::consts::PI;

/// 环数上限
pub const MAX_RINGS: u8 = 20;
/// arm_count = 0 时使用的臂数
pub const AUTO_ARMS: u8 = 6;

const NEWTON_TOLERANCE: f64 = 1e-15;
const NEWTON_MAX_ITER: usize = 100;

/// [-1, 1] 上 n 点 Gauss-Legendre 节点与权重（节点升序）
pub fn gauss_legendre(n: usize) -> Vec<(f64, f64)> {
    let mut nodes = Vec::with_capacity(n);
    for i in 0..n {
        // Chebyshev 初值，牛顿迭代求 P_n 的根
        let mut x = -(PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        for _ in 0..NEWTON_MAX_ITER {
            let (p, dp) = legendre(n, x);
            let dx = p / dp;
            x -= dx;
            if dx.abs() < NEWTON_TOLERANCE {
                break;
            }
        }
        let (_, dp) = legendre(n, x);
        let weight = 2.0 / ((1.0 - x * x) * dp * dp);
        nodes.push((x, weight));
    }
    nodes
}

/// P_n(x) 及其导数（三项递推）
fn legendre(n: usize, x: f64) -> (f64, f64) {
    let mut p0 = 1.0;
    let mut p1 = x;
    if n == 0 {
        return (1.0, 0.0);
    }
    for k in 2..=n {
        let k = k as f64;
        let p2 = ((2.0 * k - 1.0) * x * p1 - (k - 1.0) * p0) / k;
        p0 = p1;
        p1 = p2;
    }
    let dp = n as f64 * (x * p1 - p0) / (x * x - 1.0);
    (p1, dp)
}

/// 光瞳环：(归一化半径, 权重)，权重和为 1
pub fn pupil_rings(rings: u8) -> Vec<(f64, f64)> {
    let n = rings.clamp(1, MAX_RINGS) as usize;
    gauss_legendre(n)
        .into_iter()
        .map(|(x, w)| (((1.0 + x) / 2.0).sqrt(), w / 2.0))
        .collect()
}

/// 光瞳采样点
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PupilPoint {
    pub px: f64,
    pub py: f64,
    pub weight: f64,
}

/// rings × arms 个采样点，权重和为 1；arms = 0 时用 AUTO_ARMS
pub fn pupil_points(rings: u8, arms: u8) -> Vec<PupilPoint> {
    let arms = if arms == 0 { AUTO_ARMS } else { arms };
    let mut points = Vec::new();
    for (rho, ring_weight) in pupil_rings(rings) {
        for j in 0..arms {
            let theta = PI * (j as f64 + 0.5) / arms as f64;
            points.push(PupilPoint {
                px: rho * theta.sin(),
                py: rho * theta.cos(),
                weight: ring_weight / arms as f64,
            });
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_gauss_legendre_two_points() {
        let nodes = gauss_legendre(2);
        let r = 1.0 / 3f64.sqrt();
        assert!(close(nodes[0].0, -r));
        assert!(close(nodes[1].0, r));
        assert!(close(nodes[0].1, 1.0));
        assert!(close(nodes[1].1, 1.0));
    }

    #[test]
    fn test_gauss_legendre_integrates_polynomials() {
        // n 点规则对 2n-1 次多项式精确
        for n in 1..=6 {
            let nodes = gauss_legendre(n);
            let sum_w: f64 = nodes.iter().map(|(_, w)| w).sum();
            assert!(close(sum_w, 2.0), "n={n}");
            let degree = 2 * n - 2;
            let integral: f64 = nodes.iter().map(|(x, w)| w * x.powi(degree as i32)).sum();
            assert!((integral - 2.0 / (degree as f64 + 1.0)).abs() < 1e-10, "n={n}");
        }
    }

    #[test]
    fn test_pupil_rings_inside_unit_pupil() {
        for rings in 1..=6 {
            let rs = pupil_rings(rings);
            assert_eq!(rs.len(), rings as usize);
            let total: f64 = rs.iter().map(|(_, w)| w).sum();
            assert!(close(total, 1.0));
            assert!(rs.iter().all(|(rho, _)| *rho > 0.0 && *rho < 1.0));
        }
        assert_eq!(pupil_rings(0).len(), 1);
    }

    #[test]
    fn test_pupil_points_auto_arms() {
        let points = pupil_points(3, 0);
        assert_eq!(points.len(), 3 * AUTO_ARMS as usize);
        let total: f64 = points.iter().map(|p| p.weight).sum();
        assert!(close(total, 1.0));
        assert!(points.iter().all(|p| p.px >= 0.0));
    }
}
