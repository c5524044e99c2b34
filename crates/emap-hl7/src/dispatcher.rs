//! 触发事件分发
//!
//! 按 MSH-9 选择构建器，把一条原始HL7消息转成零到多条交换消息。
//! 分发本身不会失败：所有可预期的问题都归类为 [`DispatchOutcome`]，
//! 由调用方决定日志级别与是否推进书签。

use crate::builders::{AdtMessageBuilder, FlowsheetBuilder, LabMessageBuilder};
use crate::context::Hl7Context;
use crate::error::{Hl7Error, Result};
use crate::parser::{Hl7Message, Hl7Parser};
use emap_core::utils::{source_message_id, sub_message_id};
use emap_interchange::InterchangeMessage;
use std::fmt;
use tracing::{debug, error, info, warn};

/// 一条源记录的处理结果分类
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// 正常构建（可能为零条消息）
    Built,
    /// 信封无法解析
    InvalidFormat(String),
    /// 未实现的消息类型或触发事件
    NotImplemented(String),
    /// 故意不处理的消息
    Ignored(String),
    /// 整条消息内部矛盾或数据类型错误
    Rejected(String),
}

impl DispatchOutcome {
    fn from_error(e: Hl7Error) -> Self {
        match e {
            Hl7Error::InvalidFormat(m) => DispatchOutcome::InvalidFormat(m),
            Hl7Error::NotImplemented(m) => DispatchOutcome::NotImplemented(m),
            Hl7Error::MessageIgnored(m) => DispatchOutcome::Ignored(m),
            other => DispatchOutcome::Rejected(other.to_string()),
        }
    }

    pub fn is_built(&self) -> bool {
        matches!(self, DispatchOutcome::Built)
    }

    /// 统计与指标使用的短名称
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Built => "built",
            DispatchOutcome::InvalidFormat(_) => "invalid_format",
            DispatchOutcome::NotImplemented(_) => "not_implemented",
            DispatchOutcome::Ignored(_) => "ignored",
            DispatchOutcome::Rejected(_) => "rejected",
        }
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchOutcome::Built => write!(f, "built"),
            DispatchOutcome::InvalidFormat(m) => write!(f, "invalid format: {}", m),
            DispatchOutcome::NotImplemented(m) => write!(f, "not implemented: {}", m),
            DispatchOutcome::Ignored(m) => write!(f, "ignored: {}", m),
            DispatchOutcome::Rejected(m) => write!(f, "rejected: {}", m),
        }
    }
}

/// 分发结果
#[derive(Debug, Clone)]
pub struct Dispatched {
    /// 例如 `ADT^A01`；信封无法解析时为 `UNKNOWN`
    pub message_code: String,
    pub source_message_id: String,
    pub messages: Vec<InterchangeMessage>,
    pub outcome: DispatchOutcome,
}

/// HL7消息分发器
#[derive(Debug, Clone)]
pub struct Hl7Dispatcher {
    ctx: Hl7Context,
    parser: Hl7Parser,
}

impl Hl7Dispatcher {
    pub fn new(ctx: Hl7Context) -> Self {
        Self {
            ctx,
            parser: Hl7Parser::new(),
        }
    }

    pub fn context(&self) -> &Hl7Context {
        &self.ctx
    }

    /// 分发一条源记录
    pub fn dispatch(&self, raw: &str, unid: i64) -> Dispatched {
        let source_id = source_message_id(unid);

        // 1. 解析信封
        let message = match self.parser.parse(raw) {
            Ok(message) => message,
            Err(e) => {
                error!("Could not parse HL7 message {}: {}", source_id, e);
                return Dispatched {
                    message_code: "UNKNOWN".to_string(),
                    source_message_id: source_id,
                    messages: Vec::new(),
                    outcome: DispatchOutcome::from_error(e),
                };
            }
        };
        let message_code = message.message_code();

        // 2. 构建
        let (mut messages, outcome) = match self.build(&message, &source_id) {
            Ok(messages) => (messages, DispatchOutcome::Built),
            Err(e) => {
                let outcome = DispatchOutcome::from_error(e);
                match &outcome {
                    DispatchOutcome::NotImplemented(m) => info!("{} {}: {}", source_id, message_code, m),
                    DispatchOutcome::Ignored(m) => warn!("{} {}: {}", source_id, message_code, m),
                    other => error!("{} {}: {}", source_id, message_code, other),
                }
                (Vec::new(), outcome)
            }
        };

        // 3. 多条消息时分配子ID
        if messages.len() > 1 {
            for (index, msg) in messages.iter_mut().enumerate() {
                msg.set_source_message_id(sub_message_id(&source_id, index + 1));
            }
        }

        Dispatched {
            message_code,
            source_message_id: source_id,
            messages,
            outcome,
        }
    }

    fn build(&self, message: &Hl7Message, source_id: &str) -> Result<Vec<InterchangeMessage>> {
        match (message.message_type.as_str(), message.trigger_event.as_str()) {
            ("ADT", _) => self.build_adt(message, source_id),
            ("ORU", "R01") => {
                let facility = message
                    .segment("MSH")
                    .and_then(|msh| msh.value(4, 0, 1))
                    .unwrap_or("");
                if facility == self.ctx.flowsheet_facility() {
                    let flowsheets = FlowsheetBuilder::new(&self.ctx).build(message, source_id)?;
                    return Ok(flowsheets.into_iter().map(InterchangeMessage::Flowsheet).collect());
                }
                let mut messages = self.patient_update(message, source_id);
                let results = LabMessageBuilder::new(&self.ctx).build_results(message, source_id)?;
                messages.extend(results.into_iter().map(InterchangeMessage::LabResult));
                Ok(messages)
            }
            ("ORM", "O01") => {
                let mut messages = self.patient_update(message, source_id);
                let orders = LabMessageBuilder::new(&self.ctx).build_orders(message, source_id)?;
                messages.extend(orders.into_iter().map(InterchangeMessage::LabOrder));
                Ok(messages)
            }
            (message_type, trigger) => Err(Hl7Error::NotImplemented(format!(
                "Could not construct message from unknown type {}^{}",
                message_type, trigger
            ))),
        }
    }

    fn build_adt(&self, message: &Hl7Message, source_id: &str) -> Result<Vec<InterchangeMessage>> {
        let sender = message
            .segment("MSH")
            .and_then(|msh| msh.value(3, 0, 1))
            .unwrap_or("");
        if sender != self.ctx.allowed_adt_sender() {
            error!("ADT message {} from unexpected sender '{}'", source_id, sender);
            return Err(Hl7Error::MessageIgnored(format!(
                "ADT messages are only accepted from {}",
                self.ctx.allowed_adt_sender()
            )));
        }
        let adt = AdtMessageBuilder::new(&self.ctx).build(message, source_id)?;
        Ok(vec![InterchangeMessage::Adt(adt)])
    }

    /// 检验消息中的患者信息；失败不影响检验数据
    fn patient_update(&self, message: &Hl7Message, source_id: &str) -> Vec<InterchangeMessage> {
        match AdtMessageBuilder::new(&self.ctx).build_patient_update(message, source_id) {
            Ok(adt) => vec![InterchangeMessage::Adt(adt)],
            Err(e) => {
                debug!("No patient update from {}: {}", source_id, e);
                Vec::new()
            }
        }
    }
}
