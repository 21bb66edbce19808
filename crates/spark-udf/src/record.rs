//! 通用记录：位置寻址、类型擦除的标量序列，以及顺序读取它的游标。
//!
//! # 设计背景（Why）
//! - 调用方在运行时才知道函数的输入/输出列布局，无法使用生成的字段访问器；
//!   记录因此只保留“第 N 个槽位是什么标量”，由调用方按描述符声明的列顺序依次写入、读取。
//!
//! # 契约说明（What）
//! - 槽位要么是某个具体 [`Scalar`]，要么为空（`None`）；追加后类型不再变化；
//! - [`Cursor`] 的每次 `fetch_*` 只要未到末尾就恰好消费一个槽位：槽位非空且类型匹配时返回值，
//!   否则返回 `None`；到达末尾后重复调用始终返回 `None` 且不破坏状态；
//! - 游标借用记录，借用期间记录不可变更，由借用检查器保证。

use std::fmt;

use crate::error::ErrorInfo;

/// 标量值的闭集。
///
/// 新增变体会让所有 `match` 在编译期失败，而不是在运行期悄悄退化为空值。
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int4(i32),
    Int8(i64),
    Uint4(u32),
    Uint8(u64),
    Float(f32),
    Double(f64),
    String(String),
}

/// 标量类型标签。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    Int4,
    Int8,
    Uint4,
    Uint8,
    Float,
    Double,
    String,
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::Bool(_) => ScalarKind::Bool,
            Scalar::Int4(_) => ScalarKind::Int4,
            Scalar::Int8(_) => ScalarKind::Int8,
            Scalar::Uint4(_) => ScalarKind::Uint4,
            Scalar::Uint8(_) => ScalarKind::Uint8,
            Scalar::Float(_) => ScalarKind::Float,
            Scalar::Double(_) => ScalarKind::Double,
            Scalar::String(_) => ScalarKind::String,
        }
    }
}

impl ScalarKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Int4 => "int4",
            ScalarKind::Int8 => "int8",
            ScalarKind::Uint4 => "uint4",
            ScalarKind::Uint8 => "uint8",
            ScalarKind::Float => "float",
            ScalarKind::Double => "double",
            ScalarKind::String => "string",
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

mod sealed {
    pub trait Sealed {}
}

/// 可存入记录槽位的 Rust 类型。
///
/// 该 trait 被封闭，集合与 [`Scalar`] 的变体一一对应。
pub trait ScalarType: sealed::Sealed + Sized {
    const KIND: ScalarKind;

    fn into_scalar(self) -> Scalar;

    /// 类型匹配时取出值，否则返回 `None`。
    fn from_scalar(scalar: &Scalar) -> Option<Self>;
}

macro_rules! scalar_type {
    ($ty:ty, $variant:ident) => {
        impl sealed::Sealed for $ty {}

        impl ScalarType for $ty {
            const KIND: ScalarKind = ScalarKind::$variant;

            fn into_scalar(self) -> Scalar {
                Scalar::$variant(self)
            }

            fn from_scalar(scalar: &Scalar) -> Option<Self> {
                match scalar {
                    Scalar::$variant(value) => Some(value.clone()),
                    _ => None,
                }
            }
        }
    };
}

scalar_type!(bool, Bool);
scalar_type!(i32, Int4);
scalar_type!(i64, Int8);
scalar_type!(u32, Uint4);
scalar_type!(u64, Uint8);
scalar_type!(f32, Float);
scalar_type!(f64, Double);
scalar_type!(String, String);

/// 通用记录。
///
/// # 教案式说明
/// - **意图 (Why)**：请求与响应各自独占一份记录；流式调用中记录整体移入、移出
///   [`crate::stream::GenericRecordStream`]，所有权随之转移。
/// - **契约 (What)**：
///   - `add_*` / `add_*_null` 追加槽位，顺序即列顺序；
///   - `reset` 同时清空槽位与附着的 [`ErrorInfo`]；
///   - 只要 [`GenericRecord::error`] 为 `Some`，记录即代表失败结果，槽位内容不可信。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenericRecord {
    values: Vec<Option<Scalar>>,
    error: Option<ErrorInfo>,
}

macro_rules! record_adders {
    ($($add:ident, $add_null:ident => $ty:ty;)*) => {
        $(
            pub fn $add(&mut self, value: $ty) {
                self.push(Some(value));
            }

            pub fn $add_null(&mut self) {
                self.push::<$ty>(None);
            }
        )*
    };
}

impl GenericRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// 构造只携带错误的失败记录，常用于流式调用的终止错误。
    pub fn failed(error: ErrorInfo) -> Self {
        Self {
            values: Vec::new(),
            error: Some(error),
        }
    }

    /// 追加一个槽位；`None` 表示空值。
    pub fn push<T: ScalarType>(&mut self, value: Option<T>) {
        self.values.push(value.map(ScalarType::into_scalar));
    }

    /// 直接追加已擦除类型的槽位。
    pub fn push_scalar(&mut self, value: Option<Scalar>) {
        self.values.push(value);
    }

    record_adders! {
        add_bool, add_bool_null => bool;
        add_int4, add_int4_null => i32;
        add_int8, add_int8_null => i64;
        add_uint4, add_uint4_null => u32;
        add_uint8, add_uint8_null => u64;
        add_float, add_float_null => f32;
        add_double, add_double_null => f64;
    }

    pub fn add_string(&mut self, value: impl Into<String>) {
        self.push(Some(value.into()));
    }

    pub fn add_string_null(&mut self) {
        self.push::<String>(None);
    }

    /// 清空槽位与错误，回到刚构造时的状态。
    pub fn reset(&mut self) {
        self.values.clear();
        self.error = None;
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Option<Scalar>] {
        &self.values
    }

    /// 创建从首个槽位开始的游标；不复制槽位。
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(&self.values)
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    pub fn set_error(&mut self, error: ErrorInfo) {
        self.error = Some(error);
    }

    pub fn take_error(&mut self) -> Option<ErrorInfo> {
        self.error.take()
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// 只读前向游标。
#[derive(Clone, Debug)]
pub struct Cursor<'a> {
    values: &'a [Option<Scalar>],
    position: usize,
}

macro_rules! cursor_fetchers {
    ($($fetch:ident => $ty:ty;)*) => {
        $(
            pub fn $fetch(&mut self) -> Option<$ty> {
                self.fetch::<$ty>()
            }
        )*
    };
}

impl<'a> Cursor<'a> {
    pub fn new(values: &'a [Option<Scalar>]) -> Self {
        Self {
            values,
            position: 0,
        }
    }

    /// 是否还有未消费的槽位。
    pub fn has_next(&self) -> bool {
        self.position < self.values.len()
    }

    /// 已消费的槽位数。
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.values.len() - self.position
    }

    /// 消费一个槽位并按类型取值。
    ///
    /// 未到末尾时无论类型是否匹配、槽位是否为空都前进一格；到达末尾后返回 `None` 且位置不变。
    pub fn fetch<T: ScalarType>(&mut self) -> Option<T> {
        self.next_slot()?.and_then(T::from_scalar)
    }

    /// 消费一个槽位并原样返回；外层 `None` 表示已到末尾，内层 `None` 表示空槽位。
    pub fn next_slot(&mut self) -> Option<Option<&'a Scalar>> {
        let slot = self.values.get(self.position)?;
        self.position += 1;
        Some(slot.as_ref())
    }

    /// 查看下一个槽位而不消费。
    pub fn peek_kind(&self) -> Option<Option<ScalarKind>> {
        self.values
            .get(self.position)
            .map(|slot| slot.as_ref().map(Scalar::kind))
    }

    cursor_fetchers! {
        fetch_bool => bool;
        fetch_int4 => i32;
        fetch_int8 => i64;
        fetch_uint4 => u32;
        fetch_uint8 => u64;
        fetch_float => f32;
        fetch_double => f64;
        fetch_string => String;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_values_and_error() {
        let mut record = GenericRecord::new();
        record.add_int4(7);
        record.set_error(ErrorInfo::internal("boom"));
        record.reset();
        assert!(record.is_empty());
        assert!(record.error().is_none(), "reset 必须同时清除错误");
    }

    #[test]
    fn peek_does_not_advance() {
        let mut record = GenericRecord::new();
        record.add_uint8(9);
        record.add_string_null();
        let mut cursor = record.cursor();
        assert_eq!(cursor.peek_kind(), Some(Some(ScalarKind::Uint8)));
        assert_eq!(cursor.position(), 0);
        assert_eq!(cursor.fetch_uint8(), Some(9));
        assert_eq!(cursor.peek_kind(), Some(None), "空槽位应报告为内层 None");
        assert_eq!(cursor.next_slot(), Some(None));
        assert_eq!(cursor.peek_kind(), None);
    }
}
