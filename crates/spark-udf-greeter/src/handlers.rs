//! Greeter 各函数的处理器。
//!
//! # 逻辑解析（How）
//! - 请求记录按输入描述符的列顺序读取，组装成 [`crate::messages`] 中的负载，经通道发往服务端；
//! - 响应负载再按输出描述符的列顺序写回记录，流式响应逐条推入记录流；
//! - 嵌套消息列按深度优先展开为连续槽位，oneof 的每个成员各占一个槽位，未选中的成员为空。

use std::ops::ControlFlow;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use spark_udf::{
    CallResponse, ErrorInfo, GenericRecord, GenericRecordStream, Invocation, channel::MessageSink,
};

use crate::messages::{
    ChatMessage, Contact, CountReply, CountRequest, DescribeReply, DescribeRequest, HelloReply,
    HelloRequest, IntValue, Person, decode, encode,
};

/// `SayHello(name) -> message`
pub fn say_hello(invocation: Invocation<'_>, mut response: CallResponse<'_>) -> Result<(), ErrorInfo> {
    let name = invocation
        .request
        .cursor()
        .fetch_string()
        .ok_or_else(|| ErrorInfo::invalid_argument("SayHello requires a name"))?;
    let reply: HelloReply = unary(&invocation, &HelloRequest { name })?;
    if let Some(record) = response.record() {
        record.add_string(reply.message);
    }
    Ok(())
}

/// `AddIntOne(value) -> value`；空输入不发出请求，直接回写空值。
pub fn add_int_one(invocation: Invocation<'_>, mut response: CallResponse<'_>) -> Result<(), ErrorInfo> {
    let reply = match invocation.request.cursor().fetch_int4() {
        Some(value) => Some(unary::<_, IntValue>(&invocation, &IntValue { value })?),
        None => None,
    };
    if let Some(record) = response.record() {
        match reply {
            Some(reply) => record.add_int4(reply.value),
            None => record.add_int4_null(),
        }
    }
    Ok(())
}

/// `CountUp(start, count) -> stream value`
pub fn count_up(invocation: Invocation<'_>, response: CallResponse<'_>) -> Result<(), ErrorInfo> {
    let stream = expect_stream(&response, "CountUp")?;
    let mut cursor = invocation.request.cursor();
    let request = CountRequest {
        start: cursor.fetch_int8().unwrap_or_default(),
        count: cursor.fetch_uint4().unwrap_or_default(),
    };
    let payload = encode(&request)?;
    relay(
        stream,
        |record, reply: CountReply| record.add_int8(reply.value),
        |sink| {
            invocation
                .channel
                .server_streaming(invocation.context, invocation.method, payload, sink)
        },
    )
}

/// `JoinNames(stream name) -> message`：请求记录的每一行是一条消息。
pub fn join_names(invocation: Invocation<'_>, mut response: CallResponse<'_>) -> Result<(), ErrorInfo> {
    let requests = invocation
        .rows()
        .map(|mut row| {
            encode(&HelloRequest {
                name: row.fetch_string().unwrap_or_default(),
            })
        })
        .collect::<Result<Vec<Bytes>, _>>()?;
    let reply = invocation
        .channel
        .client_streaming(invocation.context, invocation.method, requests)?;
    let reply: HelloReply = decode(&reply)?;
    if let Some(record) = response.record() {
        record.add_string(reply.message);
    }
    Ok(())
}

/// `Chat(stream text) -> stream text`
pub fn chat(invocation: Invocation<'_>, response: CallResponse<'_>) -> Result<(), ErrorInfo> {
    let stream = expect_stream(&response, "Chat")?;
    let requests = invocation
        .rows()
        .map(|mut row| {
            encode(&ChatMessage {
                text: row.fetch_string().unwrap_or_default(),
            })
        })
        .collect::<Result<Vec<Bytes>, _>>()?;
    tracing::trace!(messages = requests.len(), "chat opening");
    relay(
        stream,
        |record, reply: ChatMessage| record.add_string(reply.text),
        |sink| {
            invocation
                .channel
                .bidi_streaming(invocation.context, invocation.method, requests, sink)
        },
    )
}

/// `Describe(person{name, age}, oneof contact{email, phone}) -> summary`
pub fn describe(invocation: Invocation<'_>, mut response: CallResponse<'_>) -> Result<(), ErrorInfo> {
    let mut cursor = invocation.request.cursor();
    let person = Person {
        name: cursor.fetch_string().unwrap_or_default(),
        age: cursor.fetch_int4().unwrap_or_default(),
    };
    let contact = match (cursor.fetch_string(), cursor.fetch_string()) {
        (Some(_), Some(_)) => {
            return Err(ErrorInfo::invalid_argument(
                "oneof `contact` has more than one member set",
            ));
        }
        (Some(email), None) => Some(Contact::Email(email)),
        (None, Some(phone)) => Some(Contact::Phone(phone)),
        (None, None) => None,
    };
    let reply: DescribeReply = unary(&invocation, &DescribeRequest { person, contact })?;
    if let Some(record) = response.record() {
        record.add_string(reply.summary);
    }
    Ok(())
}

fn unary<Req, Resp>(invocation: &Invocation<'_>, request: &Req) -> Result<Resp, ErrorInfo>
where
    Req: serde::Serialize,
    Resp: DeserializeOwned,
{
    let reply = invocation
        .channel
        .unary(invocation.context, invocation.method, encode(request)?)?;
    decode(&reply)
}

fn expect_stream<'a>(
    response: &'a CallResponse<'_>,
    function: &str,
) -> Result<&'a GenericRecordStream, ErrorInfo> {
    response
        .stream()
        .ok_or_else(|| ErrorInfo::internal(format!("{function} expects a stream response")))
}

/// 把通道交付的每条响应解码后推入 `stream`。
///
/// 解码失败或流已被消费方关闭时停止接收；前者作为错误返回。
fn relay<T, F, C>(stream: &GenericRecordStream, fill: F, call: C) -> Result<(), ErrorInfo>
where
    T: DeserializeOwned,
    F: Fn(&mut GenericRecord, T),
    C: FnOnce(MessageSink<'_>) -> Result<(), ErrorInfo>,
{
    let mut malformed = None;
    let mut sink = |payload: Bytes| match decode::<T>(&payload) {
        Ok(reply) => {
            let mut record = GenericRecord::new();
            fill(&mut record, reply);
            if stream.push(record) {
                ControlFlow::Continue(())
            } else {
                ControlFlow::Break(())
            }
        }
        Err(err) => {
            malformed = Some(err);
            ControlFlow::Break(())
        }
    };
    call(&mut sink)?;
    malformed.map_or(Ok(()), Err)
}
