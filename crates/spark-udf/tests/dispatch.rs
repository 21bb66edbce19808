//! 分发表与客户端契约测试：按 `(service, function)` 寻址、失败折叠为值、流式终止保证。

mod support;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use spark_udf::{
    CallContext, CallResponse, Cancellation, DispatchKey, DispatchTable, ErrorInfo,
    GenericClient, GenericClientFactory, GenericRecord, GenericRecordStream, Invocation,
    StatusCode, StreamStatus,
};
use support::{ECHO, ECHO_PACKAGE, INCREMENT, REPEAT, SUM, echo_channel, echo_table};

fn client() -> Box<dyn GenericClient> {
    echo_table()
        .into_factory()
        .create(echo_channel())
        .expect("回环通道可用")
}

fn drain(stream: &GenericRecordStream) -> Vec<Result<String, StatusCode>> {
    stream
        .records()
        .map(|outcome| {
            outcome
                .map(|record| record.cursor().fetch_string().unwrap_or_default())
                .map_err(|err| err.code())
        })
        .collect()
}

#[test]
fn hello_round_trips_through_unary_echo() {
    let client = client();
    let mut request = GenericRecord::new();
    request.add_string("hello");
    let mut response = GenericRecord::new();

    client.call(&CallContext::default(), ECHO, &request, CallResponse::Record(&mut response));

    assert!(response.error().is_none(), "{:?}", response.error());
    let mut cursor = response.cursor();
    assert!(cursor.has_next());
    assert_eq!(cursor.fetch_string().as_deref(), Some("hello"), "首个槽位必须是回显字符串");
}

#[test]
fn function_index_selects_exactly_one_handler() {
    let hits = [Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0))];
    let mut table = DispatchTable::new(&ECHO_PACKAGE);
    for (index, counter) in hits.iter().enumerate() {
        let counter = Arc::clone(counter);
        table
            .route(
                DispatchKey::new(0, index as u32),
                move |_inv: Invocation<'_>, _resp: CallResponse<'_>| -> Result<(), ErrorInfo> {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .expect("下标存在于描述符中");
    }
    let client = Arc::new(table).bind(echo_channel());

    let mut response = GenericRecord::new();
    client.call(&CallContext::default(), INCREMENT, &GenericRecord::new(), CallResponse::Record(&mut response));

    assert_eq!(hits[0].load(Ordering::SeqCst), 0, "下标 1 的调用不得触发下标 0 的处理器");
    assert_eq!(hits[1].load(Ordering::SeqCst), 1);
}

#[test]
fn unknown_key_reports_unimplemented() {
    let client = client();
    let mut response = GenericRecord::new();
    response.add_int4(99);
    client.call(
        &CallContext::default(),
        DispatchKey::new(7, 0),
        &GenericRecord::new(),
        CallResponse::Record(&mut response),
    );
    assert_eq!(response.error().map(ErrorInfo::code), Some(StatusCode::Unimplemented));
    assert!(response.is_empty(), "响应记录必须先被重置");
}

#[test]
fn null_input_degrades_to_null_output() {
    let client = client();
    let mut request = GenericRecord::new();
    request.add_string("not a number");
    let mut response = GenericRecord::new();
    client.call(&CallContext::default(), INCREMENT, &request, CallResponse::Record(&mut response));
    assert!(response.error().is_none());
    let mut cursor = response.cursor();
    assert!(cursor.has_next());
    assert_eq!(cursor.fetch_int4(), None, "类型不符的输入按空值处理");
}

#[test]
fn server_stream_ends_after_all_records() {
    let client = client();
    let mut request = GenericRecord::new();
    request.add_string("ping");
    let stream = GenericRecordStream::new();

    client.call(&CallContext::default(), REPEAT, &request, CallResponse::Stream(&stream));

    assert_eq!(
        drain(&stream),
        vec![Ok("ping#0".to_string()), Ok("ping#1".to_string()), Ok("ping#2".to_string())]
    );
    let mut record = GenericRecord::new();
    assert_eq!(stream.try_next(&mut record), StreamStatus::EndOfStream);
}

#[test]
fn mid_stream_failure_is_one_error_record_before_end() {
    let client = client();
    let mut request = GenericRecord::new();
    request.add_string("fail");
    let stream = GenericRecordStream::new();

    client.call(&CallContext::default(), REPEAT, &request, CallResponse::Stream(&stream));

    assert_eq!(drain(&stream), vec![Ok("fail#0".to_string()), Err(StatusCode::Unavailable)]);
}

#[test]
fn response_shape_mismatch_is_invalid_argument() {
    let client = client();
    let stream = GenericRecordStream::new();
    client.call(&CallContext::default(), ECHO, &GenericRecord::new(), CallResponse::Stream(&stream));
    assert_eq!(drain(&stream), vec![Err(StatusCode::InvalidArgument)]);

    let mut response = GenericRecord::new();
    client.call(&CallContext::default(), REPEAT, &GenericRecord::new(), CallResponse::Record(&mut response));
    assert_eq!(response.error().map(ErrorInfo::code), Some(StatusCode::InvalidArgument));
}

#[test]
fn client_streaming_reads_consecutive_rows() {
    let client = client();
    let mut request = GenericRecord::new();
    for value in [1, 2, 3, 4] {
        request.add_int4(value);
    }
    let mut response = GenericRecord::new();
    client.call(&CallContext::default(), SUM, &request, CallResponse::Record(&mut response));
    assert_eq!(response.cursor().fetch_int4(), Some(10));
}

#[test]
fn cancelled_context_never_reaches_handler() {
    let cancellation = Cancellation::new();
    cancellation.cancel();
    let ctx = CallContext::builder().with_cancellation(cancellation).build();

    let stream = GenericRecordStream::new();
    client().call(&ctx, REPEAT, &GenericRecord::new(), CallResponse::Stream(&stream));
    assert_eq!(drain(&stream), vec![Err(StatusCode::Cancelled)]);
}

#[test]
fn expired_deadline_reports_deadline_exceeded() {
    let ctx = CallContext::builder().with_timeout(Duration::ZERO).build();
    let mut response = GenericRecord::new();
    client().call(&ctx, ECHO, &GenericRecord::new(), CallResponse::Record(&mut response));
    assert_eq!(response.error().map(ErrorInfo::code), Some(StatusCode::DeadlineExceeded));
}

#[test]
fn panicking_handler_becomes_internal_error() {
    let mut table = DispatchTable::new(&ECHO_PACKAGE);
    table
        .route(REPEAT, |_inv: Invocation<'_>, _resp: CallResponse<'_>| -> Result<(), ErrorInfo> {
            panic!("handler bug")
        })
        .expect("下标存在于描述符中");
    let client = Arc::new(table).bind(echo_channel());

    let stream = GenericRecordStream::new();
    client.call(&CallContext::default(), REPEAT, &GenericRecord::new(), CallResponse::Stream(&stream));
    assert_eq!(drain(&stream), vec![Err(StatusCode::Internal)], "panic 之后流也必须结束");
}

#[test]
fn routing_rejects_unknown_and_duplicate_keys() {
    let mut table = DispatchTable::new(&ECHO_PACKAGE);
    let noop = |_inv: Invocation<'_>, _resp: CallResponse<'_>| -> Result<(), ErrorInfo> { Ok(()) };
    let err = table.route(DispatchKey::new(0, 42), noop).expect_err("未知下标");
    assert_eq!(err.code(), StatusCode::NotFound);

    table.route_by_name("Echoer", "Sum", noop).expect("按名称注册");
    assert_eq!(table.method(SUM).map(|m| m.as_str()), Some("/echo.Echoer/Sum"));
    let err = table.route(SUM, noop).expect_err("重复注册");
    assert_eq!(err.code(), StatusCode::AlreadyExists);
}
