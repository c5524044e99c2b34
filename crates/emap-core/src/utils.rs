//! 通用工具函数

/// 根据源记录序号生成消息ID（10位补零）
pub fn source_message_id(unid: i64) -> String {
    format!("{:010}", unid)
}

/// 一条HL7消息拆分出多条交换消息时的子消息ID
pub fn sub_message_id(source_id: &str, index: usize) -> String {
    format!("{}_{:02}", source_id, index)
}

/// 空字符串视为未提供
pub fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
