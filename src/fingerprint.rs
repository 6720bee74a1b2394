use crate::error::BrandscopeError;
use crate::types::{DateRange, ScoredResponse};
use crate::util::store_timestamp;
use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of content, returned as hex string.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Content hash of an input set: the responses in id order plus the requested range.
/// Load order does not change the result.
pub fn input_fingerprint(
    responses: &[ScoredResponse],
    range: Option<&DateRange>,
) -> Result<String, BrandscopeError> {
    let mut sorted: Vec<&ScoredResponse> = responses.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let range_line = match range {
        Some(r) => format!("{}..{}", store_timestamp(r.start), store_timestamp(r.end)),
        None => "..".to_string(),
    };

    let mut content = range_line;
    for response in sorted {
        content.push('\n');
        content.push_str(&serde_json::to_string(response)?);
    }
    Ok(compute_hash(&content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResponseStatus;
    use chrono::{TimeZone, Utc};

    fn response(id: &str) -> ScoredResponse {
        ScoredResponse {
            id: id.to_string(),
            user_id: "u1".to_string(),
            run_id: "r1".to_string(),
            prompt_id: "p1".to_string(),
            platform: "chatgpt".to_string(),
            topic: None,
            persona: None,
            tested_at: Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
            updated_at: None,
            status: ResponseStatus::Completed,
            brands: vec![],
        }
    }

    #[test]
    fn test_compute_hash_is_hex_sha256() {
        let h = compute_hash("hello");
        assert_eq!(h.len(), 64);
        assert_eq!(h, compute_hash("hello"));
        assert_ne!(h, compute_hash("hello!"));
    }

    #[test]
    fn test_fingerprint_ignores_order() {
        let a = input_fingerprint(&[response("1"), response("2")], None).unwrap();
        let b = input_fingerprint(&[response("2"), response("1")], None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_sees_changes_and_range() {
        let base = input_fingerprint(&[response("1")], None).unwrap();
        let mut edited = response("1");
        edited.platform = "gemini".to_string();
        assert_ne!(base, input_fingerprint(&[edited], None).unwrap());

        let day = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        let range = DateRange::new(day, day).unwrap();
        assert_ne!(base, input_fingerprint(&[response("1")], Some(&range)).unwrap());
    }
}
