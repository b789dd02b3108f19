//! Topic routing-key pattern matching.
//!
//! Patterns are dot-separated: `*` matches exactly one segment, `#`
//! matches one or more segments.

pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches_at(&pattern, &key)
}

fn matches_at(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => {
            // `#` must consume at least one segment.
            (1..=key.len()).any(|n| matches_at(rest, &key[n..]))
        }
        Some((&"*", rest)) => !key.is_empty() && matches_at(rest, &key[1..]),
        Some((literal, rest)) => {
            key.first() == Some(literal) && matches_at(rest, &key[1..])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(topic_matches("order.new", "order.new"));
        assert!(!topic_matches("order.new", "order.cancelled"));
        assert!(!topic_matches("order.new", "order.new.extra"));
    }

    #[test]
    fn test_star_matches_exactly_one_segment() {
        assert!(topic_matches("candle.*.btc", "candle.new.btc"));
        assert!(!topic_matches("candle.*.btc", "candle.btc"));
        assert!(!topic_matches("candle.*.btc", "candle.new.closed.btc"));
    }

    #[test]
    fn test_hash_matches_one_or_more() {
        assert!(topic_matches("candle.new.#", "candle.new.hyperliquid.BTC-USD.1h"));
        assert!(topic_matches("order.#", "order.failed.hyperliquid.BTC-USD"));
        assert!(topic_matches("signal.#", "signal.orderblock.detected.hl.ETH-USD.4h"));
        // One-or-more: the bare prefix does not match.
        assert!(!topic_matches("candle.new.#", "candle.new"));
    }

    #[test]
    fn test_hash_in_the_middle() {
        assert!(topic_matches("a.#.z", "a.b.z"));
        assert!(topic_matches("a.#.z", "a.b.c.z"));
        assert!(!topic_matches("a.#.z", "a.z"));
    }
}
