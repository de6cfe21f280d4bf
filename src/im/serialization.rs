use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;

/// 乐观占位消息 ID 前缀
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// 时间戳反序列化（同时支持毫秒整数与 RFC3339 字符串）
///
/// 行存储返回 `timestamptz` 文本，本地 SQLite 存毫秒整数，这里统一为毫秒。
pub fn deserialize_timestamp_millis<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Millis(i64),
        Text(String),
    }

    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Millis(ms) => Ok(ms),
        RawTimestamp::Text(s) => parse_timestamp_millis(&s).map_err(serde::de::Error::custom),
    }
}

/// 解析时间字符串为毫秒时间戳
pub fn parse_timestamp_millis(s: &str) -> Result<i64, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    // 无时区的 timestamp 按 UTC 处理
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
        .map_err(|e| format!("无法解析时间 {:?}: {}", s, e))
}

/// 当前本地时钟（毫秒）
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 生成乐观占位消息的临时 ID
pub fn generate_temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4())
}
