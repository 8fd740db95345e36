/// Prefix marking a client-generated identifier that the server has not seen yet
pub const TEMP_ID_PREFIX: &str = "temp_";

/// 获取当前 UTC 时间戳（毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a temporary identifier for a record created while offline.
///
/// The server never issues ids with [`TEMP_ID_PREFIX`], so the marker alone is
/// enough to tell optimistic records apart from server rows.
pub fn temp_id() -> String {
    format!("{TEMP_ID_PREFIX}{}", uuid::Uuid::new_v4().simple())
}

/// Whether `id` was generated by [`temp_id`]
pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_id_marker() {
        let id = temp_id();
        assert!(is_temp_id(&id));
        assert!(!is_temp_id("42"));
        assert!(!is_temp_id("session-temp_1"));
    }

    #[test]
    fn test_temp_ids_are_unique() {
        assert_ne!(temp_id(), temp_id());
    }
}
