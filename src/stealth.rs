//! Identity rotation and timing perturbation.
//!
//! The target serves different layouts depending on how browser-like a
//! session looks. Sessions pick a desktop-class user agent per page context
//! and sleep a randomized interval between actions. The jitter is purely a
//! request-pattern perturbation, never a correctness mechanism.

use std::time::Duration;

use rand::Rng;

/// Sample a random starting offset into an identity pool. Drawn once per
/// session so recreations walk the pool from there.
pub fn identity_start(pool_len: usize) -> usize {
    if pool_len == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..pool_len)
}

/// Pick a user agent for a fresh page context. `start` is fixed for the
/// session and `rotation` counts the contexts it has created, so consecutive
/// recreations walk the pool instead of gambling on the same identity twice.
pub fn pick_user_agent(pool: &[String], start: usize, rotation: u32) -> String {
    if pool.is_empty() {
        // An empty pool is a config validation failure upstream; fall back
        // to a plain desktop identity rather than panicking mid-session.
        return "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string();
    }
    pool[(start + rotation as usize) % pool.len()].clone()
}

/// Sample a delay uniformly from [min, max] seconds.
pub fn jitter(min_secs: f64, max_secs: f64) -> Duration {
    let (lo, hi) = if min_secs <= max_secs {
        (min_secs, max_secs)
    } else {
        (max_secs, min_secs)
    };
    let secs = if (hi - lo).abs() < f64::EPSILON {
        lo
    } else {
        rand::thread_rng().gen_range(lo..=hi)
    };
    Duration::from_secs_f64(secs.max(0.0))
}

/// Sleep for a sampled jitter interval.
pub async fn jitter_delay(min_secs: f64, max_secs: f64) {
    tokio::time::sleep(jitter(min_secs, max_secs)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Vec<String> {
        vec!["ua-a".into(), "ua-b".into(), "ua-c".into()]
    }

    #[test]
    fn test_pick_from_pool() {
        let pool = pool();
        for rotation in 0..10 {
            let ua = pick_user_agent(&pool, identity_start(pool.len()), rotation);
            assert!(pool.contains(&ua));
        }
    }

    #[test]
    fn test_consecutive_rotations_never_repeat() {
        // With a fixed session start, adjacent recreations always move to a
        // different identity when the pool has more than one entry.
        let pool = pool();
        for start in 0..pool.len() {
            for rotation in 0..6 {
                let a = pick_user_agent(&pool, start, rotation);
                let b = pick_user_agent(&pool, start, rotation + 1);
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_rotation_wraps_around_pool() {
        let pool = pool();
        assert_eq!(
            pick_user_agent(&pool, 1, 0),
            pick_user_agent(&pool, 1, pool.len() as u32)
        );
    }

    #[test]
    fn test_identity_start_in_range() {
        assert_eq!(identity_start(0), 0);
        for _ in 0..50 {
            assert!(identity_start(3) < 3);
        }
    }

    #[test]
    fn test_empty_pool_falls_back() {
        let ua = pick_user_agent(&[], 0, 0);
        assert!(ua.contains("Mozilla/5.0"));
    }

    #[test]
    fn test_jitter_within_bounds() {
        for _ in 0..100 {
            let d = jitter(0.5, 2.0);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_secs(2));
        }
    }

    #[test]
    fn test_jitter_handles_inverted_and_equal_bounds() {
        let d = jitter(2.0, 0.5);
        assert!(d >= Duration::from_millis(500) && d <= Duration::from_secs(2));
        assert_eq!(jitter(1.0, 1.0), Duration::from_secs(1));
    }
}
