//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - [`ErrorInfo`] 是唯一允许穿越插件二进制边界的错误形态：状态码 + 消息，纯值，无展开；
//! - [`LoadError`]、[`ConfigError`] 仅在宿主侧流转，描述加载期与配置期故障，
//!   每个变体都携带触发问题的模块路径，便于在加载报告中逐模块定位。
//!
//! ## 设计要求（What）
//! - 宿主侧错误实现 `thiserror::Error`，兼容 `std::error::Error` 与 `?` 传播；
//! - [`StatusCode`] 采用 gRPC 状态码闭集，未知数值统一折叠为 [`StatusCode::Unknown`]。

use std::{fmt, path::PathBuf};

use thiserror::Error;

/// 调用结果状态码，与 gRPC 状态码逐值对应。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl StatusCode {
    /// 由线上数值还原状态码；超出已知范围时返回 [`StatusCode::Unknown`]。
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => StatusCode::Ok,
            1 => StatusCode::Cancelled,
            3 => StatusCode::InvalidArgument,
            4 => StatusCode::DeadlineExceeded,
            5 => StatusCode::NotFound,
            6 => StatusCode::AlreadyExists,
            7 => StatusCode::PermissionDenied,
            8 => StatusCode::ResourceExhausted,
            9 => StatusCode::FailedPrecondition,
            10 => StatusCode::Aborted,
            11 => StatusCode::OutOfRange,
            12 => StatusCode::Unimplemented,
            13 => StatusCode::Internal,
            14 => StatusCode::Unavailable,
            15 => StatusCode::DataLoss,
            16 => StatusCode::Unauthenticated,
            _ => StatusCode::Unknown,
        }
    }

    /// 返回线上数值。
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// 稳定的大写蛇形名称，与 gRPC 文档保持一致。
    pub const fn as_str(self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::AlreadyExists => "ALREADY_EXISTS",
            StatusCode::PermissionDenied => "PERMISSION_DENIED",
            StatusCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            StatusCode::FailedPrecondition => "FAILED_PRECONDITION",
            StatusCode::Aborted => "ABORTED",
            StatusCode::OutOfRange => "OUT_OF_RANGE",
            StatusCode::Unimplemented => "UNIMPLEMENTED",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::DataLoss => "DATA_LOSS",
            StatusCode::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 附着在记录或流终止记录上的调用错误。
///
/// # 教案式说明
/// - **意图 (Why)**：插件边界两侧可能由不同构建产出，任何“抛出的对象”都不能穿越边界；
///   失败因此被折叠成纯值并挂到响应记录上，由调用方主动检查。
/// - **契约 (What)**：`code` 为 [`StatusCode`]，`message` 为面向排障人员的描述；
///   `code == Ok` 的实例合法但无意义，构造方应避免。
#[derive(Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("{code}: {message}")]
pub struct ErrorInfo {
    code: StatusCode,
    message: String,
}

impl ErrorInfo {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Cancelled, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(StatusCode::DeadlineExceeded, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unimplemented, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }
}

/// 加载期错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：单个模块的失败不能中断整批加载；加载器把每个失败包装为该枚举，
///   写入 [`crate::loader::LoadReport`] 后继续处理兄弟模块。
/// - **契约 (What)**：只有 [`LoadError::InvalidPath`] 与 [`LoadError::Scan`] 会从 `PluginLoader::load` 以 `Err` 返回，
///   其余变体都作为逐模块结果出现。
#[derive(Debug, Error)]
pub enum LoadError {
    /// 传入路径既不是文件也不是目录。
    #[error("plugin path `{path}` is neither a module file nor a directory")]
    InvalidPath { path: PathBuf },

    /// 目录存在但无法枚举。
    #[error("cannot scan plugin directory `{path}`: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 动态库打开失败（缺失依赖、格式错误等）。
    #[error("failed to open module `{path}`: {detail}")]
    Open { path: PathBuf, detail: String },

    /// 必需的入口符号不存在。
    #[error("module `{path}` does not export `{symbol}`")]
    MissingSymbol { path: PathBuf, symbol: &'static str },

    /// 入口函数返回空指针：模块内构造失败或 panic 已被入口护栏拦截。
    #[error("entry `{symbol}` of module `{path}` returned null")]
    NullEntry { path: PathBuf, symbol: &'static str },

    /// 模块与宿主的 ABI 标记不一致。
    #[error(
        "module `{path}` was built against abi {found_abi} / spark-udf {found_core}, host expects abi {expected_abi} / spark-udf {expected_core}"
    )]
    AbiMismatch {
        path: PathBuf,
        expected_abi: u32,
        found_abi: u32,
        expected_core: &'static str,
        found_core: String,
    },

    /// 模块伴随的配置文件不可用。
    #[error("settings for module `{path}` are invalid: {source}")]
    Settings {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },
}

impl LoadError {
    /// 触发错误的模块或目录路径。
    pub fn path(&self) -> &std::path::Path {
        match self {
            LoadError::InvalidPath { path }
            | LoadError::Scan { path, .. }
            | LoadError::Open { path, .. }
            | LoadError::MissingSymbol { path, .. }
            | LoadError::NullEntry { path, .. }
            | LoadError::AbiMismatch { path, .. }
            | LoadError::Settings { path, .. } => path,
        }
    }
}

/// 配置读取错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse `{origin}`: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },
}
