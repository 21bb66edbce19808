#![cfg(loom)]

use loom::{model, thread};
use spark_udf::{CallContext, Cancellation, StatusCode};

#[test]
fn cancellation_is_visible_through_call_context() {
    //
    // 取消线程与调用线程并发：调用线程一旦观测到取消，`check` 必须报告 CANCELLED，
    // 且重复取消只有第一次返回 `true`。
    model(|| {
        let root = Cancellation::new();
        let ctx = CallContext::builder().with_cancellation(root.child()).build();
        let canceller = root.child();

        let handle = thread::spawn(move || canceller.cancel());

        while !ctx.cancellation().is_cancelled() {
            thread::yield_now();
        }
        assert_eq!(ctx.check().map_err(|err| err.code()), Err(StatusCode::Cancelled));

        assert!(handle.join().expect("取消线程不应 panic"), "第一次取消必须成功");
        assert!(!root.cancel(), "重复取消必须返回 false");
    });
}
