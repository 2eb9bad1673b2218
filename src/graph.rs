//! Identifiers for graph-backed models.

use rand::Rng;

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ID_LEN: usize = 16;

/// Builds `"<datatype>/<suffix>"`, using `assumed` as the suffix when given
/// and a random 16-character `[a-z0-9]` string otherwise.
pub fn id(datatype: &str, assumed: Option<&str>) -> String {
    match assumed {
        Some(suffix) => format!("{datatype}/{suffix}"),
        None => format!("{datatype}/{}", random_suffix()),
    }
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assumed_suffix_is_used_verbatim() {
        assert_eq!(id("user", Some("alice")), "user/alice");
    }

    #[test]
    fn random_ids_use_the_lowercase_alphabet() {
        let first = id("post", None);
        let suffix = first.strip_prefix("post/").unwrap();
        assert_eq!(suffix.len(), ID_LEN);
        assert!(suffix.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
        assert_ne!(first, id("post", None));
    }

    #[test]
    fn every_position_draws_from_the_whole_alphabet() {
        let suffixes: Vec<String> = (0..2000)
            .map(|_| id("x", None)["x/".len()..].to_string())
            .collect();
        for position in 0..ID_LEN {
            let mut seen: Vec<u8> = suffixes.iter().map(|s| s.as_bytes()[position]).collect();
            seen.sort_unstable();
            seen.dedup();
            assert!(seen.len() >= 30, "position {position} saw {} characters", seen.len());
        }
    }
}
