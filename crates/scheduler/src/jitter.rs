//! Deterministic jitter: the same `(user_id, run_slot)` pair always yields
//! the same delay, so re-running the scheduler after a restart never changes
//! when an already-computed slot's job would have fired.

/// `h = 0; for c in "<user>:<slot>": h = (h*31 + ord(c)) & 0xFFFFFFFF; return h mod (jitter_max_ms+1)`
pub fn deterministic_jitter_ms(user_id: &str, run_slot: i64, jitter_max_ms: u64) -> u64 {
    let key = format!("{user_id}:{run_slot}");
    let mut h: u32 = 0;
    for c in key.chars() {
        h = h.wrapping_mul(31).wrapping_add(c as u32);
    }
    (h as u64) % (jitter_max_ms + 1)
}

/// `floor(now_epoch_seconds / interval_seconds)`
pub fn run_slot(now_epoch_secs: i64, interval_seconds: i32) -> i64 {
    now_epoch_secs.div_euclid(interval_seconds.max(1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_is_stable_for_fixed_inputs() {
        let a = deterministic_jitter_ms("user-42", 1000, 15_000);
        let b = deterministic_jitter_ms("user-42", 1000, 15_000);
        assert_eq!(a, b);
    }

    #[test]
    fn jitter_varies_with_slot() {
        let a = deterministic_jitter_ms("user-42", 1000, 15_000);
        let b = deterministic_jitter_ms("user-42", 1001, 15_000);
        assert_ne!(a, b);
    }

    #[test]
    fn jitter_is_within_bounds() {
        for slot in 0..50 {
            let v = deterministic_jitter_ms("user-1", slot, 15_000);
            assert!(v <= 15_000);
        }
    }

    #[test]
    fn run_slot_is_floor_division() {
        assert_eq!(run_slot(125, 60), 2);
        assert_eq!(run_slot(119, 60), 1);
        assert_eq!(run_slot(120, 60), 2);
    }
}
