//! 只读 Schema 导出，供脚本绑定或排障工具打印。
//!
//! 每个可选字段都以显式 `null` 出现，键集合与描述符内容无关；
//! 递归引用的记录第二次出现时渲染为 `{"record_name": ..., "recursive": true}`。

use std::{path::Path, ptr, sync::Arc};

use serde_json::{Map, Value, json};

use crate::{
    descriptor::{
        ColumnDescriptor, FunctionDescriptor, PackageDescriptor, RecordDescriptor,
        ServiceDescriptor,
    },
    error::LoadError,
    loader::{LoadReport, LoadedPlugin, PluginLoader},
};

/// 单个包的完整描述符树。
pub fn package_to_json(package: &PackageDescriptor) -> Value {
    let version = package.version();
    json!({
        "package_name": package.name(),
        "file_name": package.file_name(),
        "version": {
            "major": version.major(),
            "minor": version.minor(),
            "patch": version.patch(),
        },
        "services": package.services().iter().map(service_to_json).collect::<Vec<_>>(),
    })
}

fn service_to_json(service: &ServiceDescriptor) -> Value {
    json!({
        "service_index": service.index(),
        "service_name": service.name(),
        "functions": service.functions().iter().map(function_to_json).collect::<Vec<_>>(),
    })
}

fn function_to_json(function: &FunctionDescriptor) -> Value {
    json!({
        "function_index": function.index(),
        "function_name": function.name(),
        "function_kind": function.kind().as_str(),
        "input_record": record_to_json(function.input_record()),
        "output_record": record_to_json(function.output_record()),
    })
}

/// 记录及其嵌套记录。
pub fn record_to_json(record: &RecordDescriptor) -> Value {
    let mut path = Vec::new();
    render_record(record, &mut path)
}

fn render_record<'a>(record: &'a RecordDescriptor, path: &mut Vec<&'a RecordDescriptor>) -> Value {
    if path.iter().any(|seen| ptr::eq(*seen, record)) {
        return json!({ "record_name": record.name(), "recursive": true });
    }
    path.push(record);
    let columns: Vec<Value> = record
        .columns()
        .iter()
        .map(|column| render_column(column, path))
        .collect();
    path.pop();
    json!({ "record_name": record.name(), "columns": columns })
}

fn render_column<'a>(column: &'a ColumnDescriptor, path: &mut Vec<&'a RecordDescriptor>) -> Value {
    let mut map = Map::new();
    map.insert("index".into(), json!(column.index()));
    map.insert("column_name".into(), json!(column.name()));
    map.insert("type_kind".into(), json!(column.column_type().as_str()));
    map.insert(
        "oneof_index".into(),
        column.oneof().map_or(Value::Null, |group| json!(group.index())),
    );
    map.insert(
        "oneof_name".into(),
        column.oneof().map_or(Value::Null, |group| json!(group.name())),
    );
    map.insert(
        "nested_record".into(),
        column
            .nested()
            .map_or(Value::Null, |nested| render_record(nested, path)),
    );
    Value::Object(map)
}

/// 已注册插件的导出：每个插件给出模块路径、是否有客户端工厂以及全部包。
pub fn export_plugins(plugins: &[Arc<LoadedPlugin>]) -> Value {
    let plugins: Vec<Value> = plugins
        .iter()
        .map(|plugin| {
            json!({
                "path": plugin.path().display().to_string(),
                "client_factory": plugin.client_factory().is_some(),
                "endpoint": plugin.settings().endpoint,
                "packages": plugin.packages().iter().map(|p| package_to_json(p)).collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({ "plugins": plugins })
}

/// [`inspect_path`] 的结果。
#[derive(Debug)]
pub struct Inspection {
    pub report: LoadReport,
    pub export: Value,
}

/// 用调用方持有的加载器加载 `path`，并导出加载器中全部已注册插件。
pub fn inspect_path(loader: &PluginLoader, path: impl AsRef<Path>) -> Result<Inspection, LoadError> {
    let report = loader.load(path)?;
    let export = export_plugins(&loader.plugins());
    Ok(Inspection { report, export })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ColumnType;

    static TREE_COLUMNS: [ColumnDescriptor; 3] = [
        ColumnDescriptor::new(0, "value", ColumnType::Int8),
        ColumnDescriptor::new(1, "left", ColumnType::Message).with_nested(&TREE),
        ColumnDescriptor::new(2, "tag", ColumnType::String).with_oneof(0, "label"),
    ];
    static TREE: RecordDescriptor = RecordDescriptor::new("Tree", &TREE_COLUMNS);

    #[test]
    fn recursive_record_renders_marker() {
        let value = record_to_json(&TREE);
        let left = &value["columns"][1]["nested_record"];
        assert_eq!(left["record_name"], "Tree");
        assert_eq!(left["recursive"], true, "自引用记录必须以标记终止");
        assert!(value["columns"][0]["nested_record"].is_null());
        assert!(value["columns"][0]["oneof_name"].is_null());
        assert_eq!(value["columns"][2]["oneof_name"], "label");
        assert_eq!(value["columns"][0]["type_kind"], "int8");
    }
}
