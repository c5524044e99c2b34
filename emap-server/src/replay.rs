//! 离线回放
//!
//! 读取一个HL7文本文件（多条消息依次排列，每条以 `MSH` 段开始），
//! 在进程内依次分发并对账，不经过数据库和消息队列。

use anyhow::{Context, Result};
use chrono::Utc;
use emap_hl7::Hl7Dispatcher;
use emap_star::{InterchangeProcessor, ProcessOutcome};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// 回放统计
#[derive(Debug, Default)]
pub struct ReplaySummary {
    pub records: usize,
    /// 按分发结果计数
    pub outcomes: BTreeMap<&'static str, usize>,
    pub applied: usize,
    pub duplicates: usize,
    pub dropped: usize,
    pub audit_rows: usize,
}

/// 按 `MSH` 段切分；段之间用 `\r` 连接
pub fn split_messages(text: &str) -> Vec<String> {
    let mut messages = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.split(['\r', '\n']).map(str::trim_end) {
        if line.is_empty() {
            continue;
        }
        if line.starts_with("MSH") && !current.is_empty() {
            messages.push(current.join("\r"));
            current.clear();
        }
        current.push(line);
    }
    if !current.is_empty() {
        messages.push(current.join("\r"));
    }
    messages
}

pub async fn replay_file(path: &Path, dispatcher: &Hl7Dispatcher, processor: &InterchangeProcessor) -> Result<ReplaySummary> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    info!("Replaying {}", path.display());
    replay_text(&text, dispatcher, processor).await
}

/// 消息按文件中的顺序编号，从1开始
pub async fn replay_text(text: &str, dispatcher: &Hl7Dispatcher, processor: &InterchangeProcessor) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();

    for (index, raw) in split_messages(text).iter().enumerate() {
        let unid = index as i64 + 1;
        let dispatched = dispatcher.dispatch(raw, unid);
        summary.records += 1;
        *summary.outcomes.entry(dispatched.outcome.label()).or_default() += 1;

        for message in &dispatched.messages {
            let outcome = processor
                .process(message, Utc::now())
                .await
                .with_context(|| format!("Failed to process {}", message.source_message_id()))?;
            match outcome {
                ProcessOutcome::Applied => summary.applied += 1,
                ProcessOutcome::Duplicate => summary.duplicates += 1,
                ProcessOutcome::Dropped(reason) => {
                    warn!("Dropped {}: {}", message.source_message_id(), reason);
                    summary.dropped += 1;
                }
            }
        }
    }

    summary.audit_rows = processor.store().read().await.audit_count();
    Ok(summary)
}
