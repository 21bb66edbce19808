//! 以真实动态库加载 Greeter：经 `PluginLoader::new()` 打开 cargo 构建出的 cdylib，
//! 在宿主与模块各自链接的 spark-udf 副本之间完成一元与服务端流调用，再卸载。

use std::{
    env,
    path::PathBuf,
    sync::{Arc, Barrier},
    thread,
    time::Duration,
};

use spark_udf::{
    CallContext, CallResponse, GenericClient, GenericRecord, GenericRecordStream, LoadStatus,
    PluginLoader, StreamState, StreamStatus, test_stubs::channel::LoopbackChannel,
};
use spark_udf_greeter::{
    COUNT_UP, SAY_HELLO,
    messages::{CountReply, CountRequest, HelloReply, HelloRequest, decode, encode},
};

/// cargo 把 cdylib 放在测试可执行文件所在的 `deps/`，并复制一份到上一级目录。
fn greeter_library() -> PathBuf {
    let exe = env::current_exe().expect("测试可执行文件路径可读");
    let deps = exe.parent().expect("测试可执行文件位于 deps 目录");
    let name = format!(
        "{}spark_udf_greeter{}",
        env::consts::DLL_PREFIX,
        env::consts::DLL_SUFFIX
    );
    [Some(deps), deps.parent()]
        .into_iter()
        .flatten()
        .map(|dir| dir.join(&name))
        .find(|candidate| candidate.is_file())
        .unwrap_or_else(|| panic!("未在 {} 附近找到 {name}", deps.display()))
}

fn slow_greeter_server() -> LoopbackChannel {
    LoopbackChannel::new("loopback:greeter-cdylib")
        .on_each("/helloworld.Greeter/SayHello", |payload| {
            let request: HelloRequest = decode(&payload)?;
            encode(&HelloReply {
                message: format!("Hello {}", request.name),
            })
        })
        .on("/helloworld.Greeter/CountUp", |_ctx, requests, sink| {
            let request: CountRequest = decode(&requests[0])?;
            for offset in 0..i64::from(request.count) {
                // 保证消费方先进入无超时等待，再由模块侧推送唤醒。
                thread::sleep(Duration::from_millis(100));
                if sink(encode(&CountReply {
                    value: request.start + offset,
                })?)
                .is_break()
                {
                    break;
                }
            }
            Ok(())
        })
}

#[test]
fn greeter_cdylib_serves_calls_and_unloads_cleanly() {
    let path = greeter_library();
    let loader = PluginLoader::new();
    let report = loader.load(&path).expect("动态库路径有效");
    let outcome = report.outcome(&path).expect("报告包含该模块");
    assert!(
        matches!(outcome.status, LoadStatus::Loaded),
        "模块应完整注册: {report}"
    );

    let plugins = loader.plugins();
    assert_eq!(plugins.len(), 1);
    assert_eq!(plugins[0].packages()[0].name(), "helloworld");

    let factory = loader
        .client_factories()
        .into_iter()
        .next()
        .expect("模块导出了客户端工厂");
    let client = factory
        .create(Arc::new(slow_greeter_server()))
        .expect("工厂接受回环通道");

    let mut request = GenericRecord::new();
    request.add_string("Ada");
    let mut response = GenericRecord::new();
    client.call(
        &CallContext::default(),
        SAY_HELLO,
        &request,
        CallResponse::Record(&mut response),
    );
    assert!(response.error().is_none(), "一元调用应成功: {:?}", response.error());
    assert_eq!(response.cursor().fetch_string().as_deref(), Some("Hello Ada"));

    let stream = Arc::new(GenericRecordStream::new());
    let ready = Arc::new(Barrier::new(2));
    let consumer = {
        let stream = Arc::clone(&stream);
        let ready = Arc::clone(&ready);
        thread::spawn(move || {
            ready.wait();
            let mut values = Vec::new();
            let mut record = GenericRecord::new();
            loop {
                match stream.next(&mut record, None) {
                    StreamStatus::Ok => values.push(record.cursor().fetch_int8()),
                    StreamStatus::EndOfStream => break values,
                    other => panic!("无超时等待不应返回 {other:?}"),
                }
            }
        })
    };

    let mut request = GenericRecord::new();
    request.add_int8(7);
    request.add_uint4(2);
    ready.wait();
    client.call(
        &CallContext::default(),
        COUNT_UP,
        &request,
        CallResponse::Stream(&stream),
    );

    let values = consumer.join().expect("消费线程不应 panic");
    assert_eq!(
        values,
        vec![Some(7), Some(8)],
        "模块侧的推送必须唤醒宿主侧的等待者"
    );
    assert_eq!(stream.state(), StreamState::EndOfStream);

    loader.unload_all();
    assert_eq!(loader.handle_count(), 0);
    drop(plugins);
    drop(factory);
    drop(client);
}
