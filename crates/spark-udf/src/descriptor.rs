//! 只读 Schema 描述符图：包 → 服务 → 函数 → 记录 → 列。
//!
//! # 设计背景（Why）
//! - 描述符由 Schema 编译器生成并固化在插件中，插件加载时一次性构造、此后永不修改；
//! - 全部字段均为 `&'static` 引用，使插件可以把整张图声明为 `static`，无需运行期分配。
//!
//! # 契约说明（What）
//! - 访问器返回的引用生命周期绑定到 `&self`：宿主通过 [`crate::loader::LoadedPlugin`]
//!   借出描述符，借用不能比持有模块引用计数的对象活得更久；
//! - `(service_index, function_index)` 在一个模块内唯一标识可调用函数，见 [`crate::client::DispatchKey`]。

use std::fmt;

use crate::client::DispatchKey;

/// 函数调用形态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Unary,
    ClientStreaming,
    ServerStreaming,
    BidirectionalStreaming,
}

impl FunctionKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            FunctionKind::Unary => "unary",
            FunctionKind::ClientStreaming => "client_streaming",
            FunctionKind::ServerStreaming => "server_streaming",
            FunctionKind::BidirectionalStreaming => "bidirectional_streaming",
        }
    }

    /// 请求侧是否为多条消息。
    pub const fn streams_requests(self) -> bool {
        matches!(
            self,
            FunctionKind::ClientStreaming | FunctionKind::BidirectionalStreaming
        )
    }

    /// 响应侧是否交付到记录流。
    pub const fn streams_responses(self) -> bool {
        matches!(
            self,
            FunctionKind::ServerStreaming | FunctionKind::BidirectionalStreaming
        )
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 列类型标签，沿用接口描述语言的字段类型划分。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Float8,
    Float4,
    Int8,
    Uint8,
    Int4,
    Fixed8,
    Fixed4,
    Boolean,
    String,
    Group,
    Message,
    Bytes,
    Uint4,
    Enum,
    Sint4,
    Sint8,
    Sfixed8,
    Sfixed4,
}

impl ColumnType {
    pub const fn as_str(self) -> &'static str {
        match self {
            ColumnType::Float8 => "float8",
            ColumnType::Float4 => "float4",
            ColumnType::Int8 => "int8",
            ColumnType::Uint8 => "uint8",
            ColumnType::Int4 => "int4",
            ColumnType::Fixed8 => "fixed8",
            ColumnType::Fixed4 => "fixed4",
            ColumnType::Boolean => "boolean",
            ColumnType::String => "string",
            ColumnType::Group => "group",
            ColumnType::Message => "message",
            ColumnType::Bytes => "bytes",
            ColumnType::Uint4 => "uint4",
            ColumnType::Enum => "grpc_enum",
            ColumnType::Sint4 => "sint4",
            ColumnType::Sint8 => "sint8",
            ColumnType::Sfixed8 => "sfixed8",
            ColumnType::Sfixed4 => "sfixed4",
        }
    }

    /// 是否为引用嵌套记录的复合列。
    pub const fn is_composite(self) -> bool {
        matches!(self, ColumnType::Group | ColumnType::Message)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 包的语义化版本三元组。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    major: u32,
    minor: u32,
    patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub const fn major(&self) -> u32 {
        self.major
    }

    pub const fn minor(&self) -> u32 {
        self.minor
    }

    pub const fn patch(&self) -> u32 {
        self.patch
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// oneof 分组成员信息：同组列至多一列有意义地填充。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OneofGroup {
    index: u32,
    name: &'static str,
}

impl OneofGroup {
    pub const fn new(index: u32, name: &'static str) -> Self {
        Self { index, name }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name(&self) -> &str {
        self.name
    }
}

/// 列描述符。
#[derive(Clone, Copy)]
pub struct ColumnDescriptor {
    index: u32,
    name: &'static str,
    column_type: ColumnType,
    oneof: Option<OneofGroup>,
    nested: Option<&'static RecordDescriptor>,
}

impl ColumnDescriptor {
    pub const fn new(index: u32, name: &'static str, column_type: ColumnType) -> Self {
        Self {
            index,
            name,
            column_type,
            oneof: None,
            nested: None,
        }
    }

    /// 标记所属 oneof 分组。
    pub const fn with_oneof(mut self, index: u32, name: &'static str) -> Self {
        self.oneof = Some(OneofGroup::new(index, name));
        self
    }

    /// 为复合列挂接嵌套记录。
    pub const fn with_nested(mut self, record: &'static RecordDescriptor) -> Self {
        self.nested = Some(record);
        self
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn oneof(&self) -> Option<&OneofGroup> {
        self.oneof.as_ref()
    }

    pub fn nested(&self) -> Option<&RecordDescriptor> {
        self.nested
    }
}

// 嵌套记录可能自引用，Debug 只打印其名称。
impl fmt::Debug for ColumnDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDescriptor")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("column_type", &self.column_type)
            .field("oneof", &self.oneof)
            .field("nested", &self.nested.map(RecordDescriptor::name))
            .finish()
    }
}

/// 记录描述符：有序列集合。
#[derive(Debug)]
pub struct RecordDescriptor {
    name: &'static str,
    columns: &'static [ColumnDescriptor],
}

impl RecordDescriptor {
    pub const fn new(name: &'static str, columns: &'static [ColumnDescriptor]) -> Self {
        Self { name, columns }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|column| column.name == name)
    }
}

/// 函数描述符。
#[derive(Debug)]
pub struct FunctionDescriptor {
    index: u32,
    name: &'static str,
    kind: FunctionKind,
    input: &'static RecordDescriptor,
    output: &'static RecordDescriptor,
}

impl FunctionDescriptor {
    pub const fn new(
        index: u32,
        name: &'static str,
        kind: FunctionKind,
        input: &'static RecordDescriptor,
        output: &'static RecordDescriptor,
    ) -> Self {
        Self {
            index,
            name,
            kind,
            input,
            output,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    pub fn input_record(&self) -> &RecordDescriptor {
        self.input
    }

    pub fn output_record(&self) -> &RecordDescriptor {
        self.output
    }
}

/// 服务描述符。
#[derive(Debug)]
pub struct ServiceDescriptor {
    index: u32,
    name: &'static str,
    functions: &'static [FunctionDescriptor],
}

impl ServiceDescriptor {
    pub const fn new(
        index: u32,
        name: &'static str,
        functions: &'static [FunctionDescriptor],
    ) -> Self {
        Self {
            index,
            name,
            functions,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn functions(&self) -> &[FunctionDescriptor] {
        self.functions
    }

    /// 按稳定下标查找函数。下标不要求与切片位置一致。
    pub fn function(&self, index: u32) -> Option<&FunctionDescriptor> {
        self.functions.iter().find(|function| function.index == index)
    }

    pub fn function_by_name(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.functions.iter().find(|function| function.name == name)
    }

    pub fn dispatch_key(&self, function: &FunctionDescriptor) -> DispatchKey {
        DispatchKey::new(self.index, function.index)
    }
}

/// 包描述符，Schema 根下的一级节点。
#[derive(Debug)]
pub struct PackageDescriptor {
    name: &'static str,
    file_name: &'static str,
    version: Version,
    services: &'static [ServiceDescriptor],
}

impl PackageDescriptor {
    pub const fn new(
        name: &'static str,
        file_name: &'static str,
        version: Version,
        services: &'static [ServiceDescriptor],
    ) -> Self {
        Self {
            name,
            file_name,
            version,
            services,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// 生成该包的接口描述文件名。
    pub fn file_name(&self) -> &str {
        self.file_name
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn services(&self) -> &[ServiceDescriptor] {
        self.services
    }

    pub fn service(&self, index: u32) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|service| service.index == index)
    }

    pub fn service_by_name(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|service| service.name == name)
    }

    /// 按分发键解析服务与函数。
    pub fn resolve(&self, key: DispatchKey) -> Option<(&ServiceDescriptor, &FunctionDescriptor)> {
        let service = self.service(key.service_index())?;
        let function = service.function(key.function_index())?;
        Some((service, function))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static LEAF_COLUMNS: [ColumnDescriptor; 2] = [
        ColumnDescriptor::new(0, "label", ColumnType::String),
        ColumnDescriptor::new(1, "child", ColumnType::Message).with_nested(&LEAF),
    ];
    static LEAF: RecordDescriptor = RecordDescriptor::new("Node", &LEAF_COLUMNS);

    #[test]
    fn self_referencing_record_debug_terminates() {
        let rendered = format!("{:?}", LEAF.columns()[1]);
        assert!(rendered.contains("Some(\"Node\")"), "嵌套记录仅打印名称: {rendered}");
        assert!(LEAF.columns()[1].column_type().is_composite());
    }

    #[test]
    fn kinds_render_stable_names() {
        assert_eq!(FunctionKind::BidirectionalStreaming.to_string(), "bidirectional_streaming");
        assert_eq!(ColumnType::Enum.to_string(), "grpc_enum");
        assert_eq!(Version::new(1, 2, 3).to_string(), "1.2.3");
        assert!(FunctionKind::ServerStreaming.streams_responses());
        assert!(!FunctionKind::ServerStreaming.streams_requests());
    }
}
