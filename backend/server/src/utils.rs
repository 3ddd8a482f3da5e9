use rand::RngCore;

pub const JSON_MEDIA_TYPE: &str = "application/json";

pub fn reply_name(verb: &str) -> String {
    format!("{verb}_reply")
}

/// True for `application/json`, ignoring parameters such as `charset`.
pub fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|media_type| media_type.trim().eq_ignore_ascii_case(JSON_MEDIA_TYPE))
        .unwrap_or(false)
}

/// Short random id tying a 500 reply to its log line.
pub fn diagnostic_id() -> String {
    let mut bytes = [0u8; 6];
    rand::rng().fill_bytes(&mut bytes);

    hex::encode(bytes)
}
