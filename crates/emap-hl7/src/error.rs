use thiserror::Error;

/// HL7解析与消息构建错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Hl7Error {
    /// 消息信封无法解析
    #[error("Invalid HL7 message format: {0}")]
    InvalidFormat(String),

    #[error("Field not present: {0}")]
    FieldNotPresent(String),

    /// 字段存在但值无法解释（时间戳、代码表等）
    #[error("Data type error: {0}")]
    DataType(String),

    /// 同一消息内字段相互矛盾
    #[error("HL7 inconsistency: {0}")]
    Inconsistency(String),

    #[error("Message ignored: {0}")]
    MessageIgnored(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// 单个结果值无法表示，跳过该值
    #[error("Skipped result: {0}")]
    SkipResult(String),
}

pub type Result<T> = std::result::Result<T, Hl7Error>;

/// 把 `FieldNotPresent` 转成 `Ok(None)`，其他错误照常传播
pub trait Tolerate<T> {
    fn tolerate(self) -> Result<Option<T>>;
}

impl<T> Tolerate<T> for Result<T> {
    fn tolerate(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(Hl7Error::FieldNotPresent(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerate_only_swallows_absent_fields() {
        let absent: Result<&str> = Err(Hl7Error::FieldNotPresent("PV1-3.1".into()));
        assert_eq!(absent.tolerate(), Ok(None));

        let present: Result<&str> = Ok("H2HH");
        assert_eq!(present.tolerate(), Ok(Some("H2HH")));

        let broken: Result<&str> = Err(Hl7Error::DataType("PV1-44".into()));
        assert!(broken.tolerate().is_err());
    }
}
