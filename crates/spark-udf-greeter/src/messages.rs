//! 通道上交换的 JSON 负载。
//!
//! 每个结构体对应一条出站或入站消息；[`encode`] / [`decode`] 把 serde 错误折叠为
//! `INTERNAL` / `INVALID_ARGUMENT` 的 [`ErrorInfo`]。

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use spark_udf::ErrorInfo;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloRequest {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloReply {
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntValue {
    pub value: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRequest {
    pub start: i64,
    pub count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountReply {
    pub value: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub age: i32,
}

/// `contact` 分组：至多一个成员有值。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Contact {
    Email(String),
    Phone(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribeRequest {
    pub person: Person,
    pub contact: Option<Contact>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribeReply {
    pub summary: String,
}

pub fn encode<T: Serialize>(message: &T) -> Result<Bytes, ErrorInfo> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(|err| ErrorInfo::internal(format!("failed to encode payload: {err}")))
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ErrorInfo> {
    serde_json::from_slice(payload)
        .map_err(|err| ErrorInfo::invalid_argument(format!("malformed payload: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_uses_snake_case_tags() {
        let request = DescribeRequest {
            person: Person {
                name: "Ada".to_string(),
                age: 36,
            },
            contact: Some(Contact::Email("ada@example.com".to_string())),
        };
        let payload = encode(&request).expect("可编码");
        let text = std::str::from_utf8(&payload).expect("JSON 为 UTF-8");
        assert!(text.contains("\"email\":\"ada@example.com\""), "oneof 成员以小写标签出现: {text}");
    }

    #[test]
    fn malformed_payload_is_invalid_argument() {
        let err = decode::<HelloReply>(b"{\"msg\":1}").expect_err("缺字段必须失败");
        assert_eq!(err.code(), spark_udf::StatusCode::InvalidArgument);
    }
}
