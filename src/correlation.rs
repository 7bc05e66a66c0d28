use rand::Rng;

pub const HEADER: &str = "x-correlation-id";

/// Generate a request correlation id of the form `req-<ms36>-<rand6>`.
///
/// The timestamp component keeps ids roughly sortable; the random suffix
/// makes collisions within one millisecond irrelevant.
pub fn new_id() -> String {
    let ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let mut rng = rand::rng();
    let suffix: String = (0..6)
        .map(|_| {
            let n = rng.random_range(0..36u32);
            std::char::from_digit(n, 36).unwrap_or('0')
        })
        .collect();
    format!("req-{}-{}", to_base36(ms), suffix)
}

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        let d = (n % 36) as u32;
        out.push(std::char::from_digit(d, 36).unwrap_or('0'));
        n /= 36;
    }
    out.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_shape() {
        let id = new_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "req");
        assert_eq!(parts[2].len(), 6);
    }

    #[test]
    fn base36_round_numbers() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }
}
