//! 只读导出测试：键集合固定、缺省值显式为 `null`、加载器由调用方持有。

mod support;

use spark_udf::{
    LoaderConfig, PluginLoader, inspect_path, introspect::package_to_json,
    test_stubs::modules::StaticModuleBackend,
};
use support::{ECHO_PACKAGE, GOOD, install};
use tempfile::tempdir;

#[test]
fn package_export_contains_version_and_full_tree() {
    let value = package_to_json(&ECHO_PACKAGE);
    assert_eq!(value["package_name"], "echo");
    assert_eq!(value["file_name"], "echo.proto");
    assert_eq!(value["version"]["major"], 0);
    assert_eq!(value["version"]["minor"], 3);
    assert_eq!(value["version"]["patch"], 1);

    let functions = &value["services"][0]["functions"];
    assert_eq!(value["services"][0]["service_name"], "Echoer");
    assert_eq!(functions.as_array().map(Vec::len), Some(4));
    assert_eq!(functions[2]["function_kind"], "server_streaming");

    let column = &functions[0]["input_record"]["columns"][0];
    for key in ["index", "column_name", "type_kind", "oneof_index", "oneof_name", "nested_record"] {
        assert!(column.get(key).is_some(), "列导出必须始终包含键 `{key}`");
    }
    assert!(column["oneof_index"].is_null());
    assert!(column["nested_record"].is_null());
    assert_eq!(column["type_kind"], "string");
}

#[test]
fn inspect_path_uses_caller_owned_loader() {
    let dir = tempdir().expect("临时目录");
    let backend = StaticModuleBackend::new();
    install(&backend, dir.path(), "good", GOOD);
    let loader = PluginLoader::with_backend(LoaderConfig::default(), backend.clone());

    let inspection = inspect_path(&loader, dir.path()).expect("目录路径合法");
    assert_eq!(inspection.report.registered(), 1);

    let plugins = inspection.export["plugins"].as_array().expect("plugins 必须是数组");
    assert_eq!(plugins.len(), 1);
    assert_eq!(plugins[0]["client_factory"], true);
    assert_eq!(plugins[0]["packages"][0]["package_name"], "echo");
    assert_eq!(loader.plugins().len(), 1, "导出之后插件仍归调用方的加载器所有");
}
