use nalgebra as na;
use num_traits::Float;

#[inline]
pub fn lerp<T: Float>(a: T, b: T, t: T) -> T {
    a + (b - a) * t
}

/// Linearly fills interior runs of `None` no longer than `max_gap`.
///
/// Leading and trailing runs have only one neighbour and stay empty, as do
/// runs longer than `max_gap`.
pub fn fill_gaps<T: Float, const N: usize>(series: &mut [Option<[T; N]>], max_gap: usize) -> usize {
    let mut filled = 0;
    let mut last_known: Option<usize> = None;

    for idx in 0..series.len() {
        let Some(end) = series[idx] else {
            continue;
        };

        if let Some(start_idx) = last_known {
            let gap = idx - start_idx - 1;

            if gap > 0 && gap <= max_gap {
                if let Some(start) = series[start_idx] {
                    let span = T::from(idx - start_idx).unwrap_or_else(T::one);

                    for (step, slot) in series[start_idx + 1..idx].iter_mut().enumerate() {
                        let t = T::from(step + 1).unwrap_or_else(T::zero) / span;
                        let mut value = start;
                        for k in 0..N {
                            value[k] = lerp(start[k], end[k], t);
                        }
                        *slot = Some(value);
                        filled += 1;
                    }
                }
            }
        }

        last_known = Some(idx);
    }

    filled
}

/// Even-odd rule point-in-polygon test.
pub fn in_polygon<T: na::Scalar + Float>(p: na::Point2<T>, poly: &[na::Point2<T>]) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut p1 = poly[0];
    let mut xints = T::zero();

    for i in 1..=n {
        let p2 = poly[i % n];

        if p.y > Float::min(p1.y, p2.y) && p.y <= Float::max(p1.y, p2.y) && p.x <= Float::max(p1.x, p2.x) {
            if Float::abs(p1.y - p2.y) > Float::epsilon() {
                xints = (p.y - p1.y) * (p2.x - p1.x) / (p2.y - p1.y) + p1.x;
            }

            if Float::abs(p1.x - p2.x) < Float::epsilon() || p.x <= xints {
                inside = !inside;
            }
        }

        p1 = p2;
    }

    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn single_gap_is_midpoint() {
        let mut s = vec![Some([0.0f32, 10.0]), None, Some([4.0, 20.0])];
        assert_eq!(fill_gaps(&mut s, 5), 1);
        let mid = s[1].unwrap();
        assert_relative_eq!(mid[0], 2.0);
        assert_relative_eq!(mid[1], 15.0);
    }

    #[test]
    fn long_and_edge_gaps_stay_empty() {
        let mut s = vec![None, Some([0.0f32]), None, None, None, Some([8.0]), None];
        assert_eq!(fill_gaps(&mut s, 2), 0);
        assert!(s[0].is_none() && s[2].is_none() && s[6].is_none());

        assert_eq!(fill_gaps(&mut s, 3), 3);
        assert_relative_eq!(s[2].unwrap()[0], 2.0);
        assert_relative_eq!(s[4].unwrap()[0], 6.0);
        assert!(s[0].is_none() && s[6].is_none());
    }

    #[test]
    fn polygon_containment() {
        let square = [
            na::Point2::new(0.0f32, 0.0),
            na::Point2::new(10.0, 0.0),
            na::Point2::new(10.0, 10.0),
            na::Point2::new(0.0, 10.0),
        ];
        assert!(in_polygon(na::Point2::new(5.0, 5.0), &square));
        assert!(!in_polygon(na::Point2::new(15.0, 5.0), &square));
        assert!(!in_polygon(na::Point2::new(5.0, -1.0), &square));
    }
}
