//! HL7 v2.x 管道格式解析
//!
//! 只做结构解析（段 / 字段 / 重复 / 组件），不做任何业务解释。
//! 字段编号与HL7标准一致从1开始；MSH段的MSH-1为字段分隔符本身，
//! MSH-2为编码字符，因此MSH-9对应原始文本中的第8个竖线之后。

use crate::error::{Hl7Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

fn segment_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z][A-Z0-9]{2}$").expect("constant segment name pattern"))
}

/// HL7段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hl7Segment {
    pub segment_type: String,
    /// `fields[i]` 为第 i+1 个字段，内层依次为重复、组件
    pub fields: Vec<Vec<Vec<String>>>,
}

impl Hl7Segment {
    /// 取字段值：`field` 和 `component` 从1开始，`repetition` 从0开始。
    /// 缺失或空串均返回 `None`。
    pub fn value(&self, field: usize, repetition: usize, component: usize) -> Option<&str> {
        if field == 0 || component == 0 {
            return None;
        }
        self.fields
            .get(field - 1)
            .and_then(|reps| reps.get(repetition))
            .and_then(|comps| comps.get(component - 1))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// 非空重复的个数
    pub fn repetitions(&self, field: usize) -> usize {
        if field == 0 {
            return 0;
        }
        self.fields
            .get(field - 1)
            .map(|reps| reps.iter().filter(|comps| comps.iter().any(|c| !c.is_empty())).count())
            .unwrap_or(0)
    }
}

/// 解析后的HL7消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hl7Message {
    /// MSH-9.1
    pub message_type: String,
    /// MSH-9.2
    pub trigger_event: String,
    /// MSH-10
    pub message_control_id: String,
    /// MSH-12
    pub version_id: String,
    pub segments: Vec<Hl7Segment>,
}

impl Hl7Message {
    /// 第一个同名段
    pub fn segment(&self, name: &str) -> Option<&Hl7Segment> {
        self.segments.iter().find(|s| s.segment_type == name)
    }

    /// 第n个（从0开始）同名段
    pub fn nth_segment(&self, name: &str, n: usize) -> Option<&Hl7Segment> {
        self.segments.iter().filter(|s| s.segment_type == name).nth(n)
    }

    pub fn segments_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Hl7Segment> + 'a {
        self.segments.iter().filter(move |s| s.segment_type == name)
    }

    /// 例如 `ADT^A01`
    pub fn message_code(&self) -> String {
        format!("{}^{}", self.message_type, self.trigger_event)
    }
}

/// HL7解析器
#[derive(Debug, Clone, Copy)]
pub struct Hl7Parser {
    field_separator: char,
    component_separator: char,
    repetition_separator: char,
    escape_character: char,
    subcomponent_separator: char,
}

impl Default for Hl7Parser {
    fn default() -> Self {
        Self {
            field_separator: '|',
            component_separator: '^',
            repetition_separator: '~',
            escape_character: '\\',
            subcomponent_separator: '&',
        }
    }
}

impl Hl7Parser {
    /// 创建新的HL7解析器
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析HL7消息
    pub fn parse(&self, message: &str) -> Result<Hl7Message> {
        // 1. 上游可能用换行分段，统一成回车
        let normalised = message.replace("\r\n", "\r").replace('\n', "\r");
        let lines: Vec<&str> = normalised
            .split('\r')
            .map(str::trim_end)
            .filter(|l| !l.trim().is_empty())
            .collect();

        let header = lines
            .first()
            .ok_or_else(|| Hl7Error::InvalidFormat("Empty message".to_string()))?;
        if !header.starts_with("MSH") {
            return Err(Hl7Error::InvalidFormat("Message must start with MSH segment".to_string()));
        }

        // 2. 从MSH读取本消息实际使用的分隔符
        let parser = self.with_encoding_from(header)?;

        // 3. 逐段解析
        let mut segments = Vec::with_capacity(lines.len());
        segments.push(parser.parse_msh(header)?);
        for line in lines.iter().skip(1) {
            segments.push(parser.parse_segment(line)?);
        }

        let msh = &segments[0];
        let message_type = msh
            .value(9, 0, 1)
            .ok_or_else(|| Hl7Error::InvalidFormat("Missing message type (MSH-9)".to_string()))?
            .to_string();
        let trigger_event = msh.value(9, 0, 2).unwrap_or_default().to_string();
        let message_control_id = msh.value(10, 0, 1).unwrap_or_default().to_string();
        let version_id = msh.value(12, 0, 1).unwrap_or_default().to_string();

        debug!("Parsed HL7 {}^{} with {} segments", message_type, trigger_event, segments.len());

        Ok(Hl7Message {
            message_type,
            trigger_event,
            message_control_id,
            version_id,
            segments,
        })
    }

    fn with_encoding_from(&self, header: &str) -> Result<Self> {
        let mut chars = header.chars().skip(3);
        let field_separator = chars
            .next()
            .ok_or_else(|| Hl7Error::InvalidFormat("MSH segment too short".to_string()))?;
        let encoding: Vec<char> = chars.take_while(|c| *c != field_separator).collect();
        if encoding.len() < 2 {
            return Err(Hl7Error::InvalidFormat(format!(
                "Invalid encoding characters in MSH-2: {:?}",
                encoding.iter().collect::<String>()
            )));
        }

        Ok(Self {
            field_separator,
            component_separator: encoding[0],
            repetition_separator: encoding[1],
            escape_character: encoding.get(2).copied().unwrap_or(self.escape_character),
            subcomponent_separator: encoding.get(3).copied().unwrap_or(self.subcomponent_separator),
        })
    }

    /// MSH段需要补上MSH-1并保留MSH-2原文
    fn parse_msh(&self, line: &str) -> Result<Hl7Segment> {
        let parts: Vec<&str> = line.split(self.field_separator).collect();
        if parts.len() < 2 {
            return Err(Hl7Error::InvalidFormat("MSH segment has no encoding characters".to_string()));
        }

        let mut fields = Vec::with_capacity(parts.len());
        fields.push(vec![vec![self.field_separator.to_string()]]);
        fields.push(vec![vec![parts[1].to_string()]]);
        for part in parts.iter().skip(2) {
            fields.push(self.parse_field(part));
        }

        Ok(Hl7Segment {
            segment_type: "MSH".to_string(),
            fields,
        })
    }

    /// 解析单个段
    fn parse_segment(&self, line: &str) -> Result<Hl7Segment> {
        let parts: Vec<&str> = line.split(self.field_separator).collect();
        let segment_type = parts[0].trim().to_string();
        if !segment_name_pattern().is_match(&segment_type) {
            return Err(Hl7Error::InvalidFormat(format!("Invalid segment name: {:?}", segment_type)));
        }

        let fields = parts.iter().skip(1).map(|part| self.parse_field(part)).collect();

        Ok(Hl7Segment {
            segment_type,
            fields,
        })
    }

    fn parse_field(&self, raw: &str) -> Vec<Vec<String>> {
        raw.split(self.repetition_separator)
            .map(|rep| rep.split(self.component_separator).map(|c| self.unescape(c)).collect())
            .collect()
    }

    /// 还原转义序列 `\F\ \S\ \T\ \R\ \E\ \.br\`，未知序列原样保留
    fn unescape(&self, value: &str) -> String {
        let esc = self.escape_character;
        if !value.contains(esc) {
            return value.to_string();
        }

        let mut out = String::with_capacity(value.len());
        let mut rest = value;
        while let Some(start) = rest.find(esc) {
            out.push_str(&rest[..start]);
            let after = &rest[start + esc.len_utf8()..];
            match after.find(esc) {
                Some(end) => {
                    let code = &after[..end];
                    match code {
                        "F" => out.push(self.field_separator),
                        "S" => out.push(self.component_separator),
                        "T" => out.push(self.subcomponent_separator),
                        "R" => out.push(self.repetition_separator),
                        "E" => out.push(esc),
                        ".br" => out.push('\n'),
                        _ => {
                            out.push(esc);
                            out.push_str(code);
                            out.push(esc);
                        }
                    }
                    rest = &after[end + esc.len_utf8()..];
                }
                None => {
                    out.push(esc);
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADT_A01: &str = "MSH|^~\\&|EPIC|UCLH|HL7|UCLH|201209211843||ADT^A01|PLW21221500942883310|P|2.2\r\
        EVN|A01|201209211843\r\
        PID|1||50032556^^^UCLH^MRN~9999999999^^^NHS^NHSNMBR||TESTSURNAME^TESTFORENAME^^^MR||19870612|M\r\
        PV1|1|I|H2HH^H203^H203-11";

    #[test]
    fn test_parse_msh_field_numbering() {
        let msg = Hl7Parser::new().parse(ADT_A01).unwrap();
        assert_eq!(msg.message_type, "ADT");
        assert_eq!(msg.trigger_event, "A01");
        assert_eq!(msg.message_control_id, "PLW21221500942883310");
        assert_eq!(msg.version_id, "2.2");

        let msh = msg.segment("MSH").unwrap();
        assert_eq!(msh.value(1, 0, 1), Some("|"));
        assert_eq!(msh.value(3, 0, 1), Some("EPIC"));
        assert_eq!(msh.value(7, 0, 1), Some("201209211843"));
    }

    #[test]
    fn test_parse_repetitions_and_components() {
        let msg = Hl7Parser::new().parse(ADT_A01).unwrap();
        let pid = msg.segment("PID").unwrap();
        assert_eq!(pid.value(3, 0, 1), Some("50032556"));
        assert_eq!(pid.value(3, 1, 1), Some("9999999999"));
        assert_eq!(pid.repetitions(3), 2);
        assert_eq!(pid.value(5, 0, 2), Some("TESTFORENAME"));
        assert_eq!(pid.value(5, 0, 3), None);
        assert_eq!(pid.value(40, 0, 1), None);
    }

    #[test]
    fn test_line_feeds_are_normalised() {
        let with_lf = ADT_A01.replace('\r', "\n");
        let msg = Hl7Parser::new().parse(&with_lf).unwrap();
        assert_eq!(msg.segments.len(), 4);
        assert_eq!(msg.segment("PV1").unwrap().value(3, 0, 3), Some("H203-11"));
    }

    #[test]
    fn test_unescape() {
        let text = "MSH|^~\\&|WinPath||||||ORU^R01|1|P|2.4\rNTE|1||a\\T\\b \\S\\ c\\.br\\d";
        let msg = Hl7Parser::new().parse(text).unwrap();
        assert_eq!(msg.segment("NTE").unwrap().value(3, 0, 1), Some("a&b ^ c\nd"));
    }

    #[test]
    fn test_invalid_envelopes() {
        let parser = Hl7Parser::new();
        assert!(matches!(parser.parse(""), Err(Hl7Error::InvalidFormat(_))));
        assert!(matches!(parser.parse("PID|1||123"), Err(Hl7Error::InvalidFormat(_))));
        assert!(matches!(parser.parse("MSH|^~\\&|EPIC\rpid|x"), Err(Hl7Error::InvalidFormat(_))));
        assert!(matches!(parser.parse("MSH|^~\\&|EPIC|||||"), Err(Hl7Error::InvalidFormat(_))));
    }
}
